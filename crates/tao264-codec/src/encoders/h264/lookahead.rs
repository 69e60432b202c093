//! 前瞻: 帧代价估计与帧类型决策.
//!
//! 代价在半分辨率亮度上以 8x8 块估计, 只用于类型决策与码率控制的复杂度参考.
//! 决策策略通过 [`FrameTypeDecider`] 插拔.

use super::frames::{FrameType, Plane};
use crate::frame::PictureType;

/// 帧代价估计 (半分辨率 SAD 之和)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCosts {
    /// 每块相对块均值的绝对差和
    pub intra: u64,
    /// 每块在前一帧小窗口内的最小 SAD, 不超过该块的帧内代价
    pub inter: u64,
}

const BLOCK: usize = 8;
const SEARCH_RADIUS: i32 = 2;

/// 2x2 平均得到半分辨率亮度
pub fn downscale_luma(luma: &Plane) -> Plane {
    let (w, h) = (luma.width / 2, luma.height / 2);
    let mut out = Plane::new(w, h, 0);
    for y in 0..h {
        let r0 = luma.row(2 * y);
        let r1 = luma.row(2 * y + 1);
        for (x, dst) in out.row_mut(y).iter_mut().enumerate() {
            let sum = u32::from(r0[2 * x]) + u32::from(r0[2 * x + 1]) + u32::from(r1[2 * x]) + u32::from(r1[2 * x + 1]);
            *dst = ((sum + 2) >> 2) as u8;
        }
    }
    out
}

fn block_intra_cost(cur: &Plane, bx: usize, by: usize) -> u64 {
    let mut sum = 0u32;
    for y in 0..BLOCK {
        sum += cur.row(by + y)[bx..bx + BLOCK].iter().map(|&v| u32::from(v)).sum::<u32>();
    }
    let mean = ((sum + 32) >> 6) as i32;
    let mut cost = 0u64;
    for y in 0..BLOCK {
        for &v in &cur.row(by + y)[bx..bx + BLOCK] {
            cost += u64::from((i32::from(v) - mean).unsigned_abs());
        }
    }
    cost
}

fn block_sad(cur: &Plane, prev: &Plane, bx: usize, by: usize, dx: i32, dy: i32) -> u64 {
    let mut sad = 0u64;
    for y in 0..BLOCK {
        let row = cur.row(by + y);
        for x in 0..BLOCK {
            let p = prev.at((bx + x) as i32 + dx, (by + y) as i32 + dy);
            sad += u64::from(row[bx + x].abs_diff(p));
        }
    }
    sad
}

/// 估计当前帧相对前一帧 (显示顺序) 的帧内/帧间代价
///
/// 没有前一帧时帧间代价等于帧内代价.
pub fn estimate_costs(cur: &Plane, prev: Option<&Plane>) -> FrameCosts {
    let mut costs = FrameCosts::default();
    let bw = cur.width / BLOCK;
    let bh = cur.height / BLOCK;
    for by in 0..bh {
        for bx in 0..bw {
            let (x, y) = (bx * BLOCK, by * BLOCK);
            let intra = block_intra_cost(cur, x, y);
            let inter = match prev {
                Some(prev) => {
                    let mut best = block_sad(cur, prev, x, y, 0, 0);
                    for dy in -SEARCH_RADIUS..=SEARCH_RADIUS {
                        for dx in -SEARCH_RADIUS..=SEARCH_RADIUS {
                            if best == 0 {
                                break;
                            }
                            if dx != 0 || dy != 0 {
                                best = best.min(block_sad(cur, prev, x, y, dx, dy));
                            }
                        }
                    }
                    best.min(intra)
                }
                None => intra,
            };
            costs.intra += intra;
            costs.inter += inter;
        }
    }
    costs
}

/// 前瞻窗口中的一帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookaheadEntry {
    pub forced: PictureType,
    pub costs: FrameCosts,
}

/// 帧类型决策策略
pub trait FrameTypeDecider: Send {
    /// 决定窗口开头一组帧的类型 (显示顺序, 最后一帧为锚点)
    ///
    /// 返回空表示需要更多帧; `flushing` 时必须用完窗口.
    fn decide(&mut self, window: &[LookaheadEntry], flushing: bool) -> Vec<FrameType>;

    /// 重新开始 (下一帧为 IDR)
    fn reset(&mut self);
}

/// 两种策略共用的 GOP 状态
#[derive(Debug, Clone, Copy)]
struct GopState {
    keyint: u32,
    max_b: usize,
    /// 窗口首帧与上一个 IDR 的距离, `None` 表示还没有 IDR
    since_idr: Option<u32>,
}

impl GopState {
    fn plan(
        &mut self,
        window: &[LookaheadEntry],
        flushing: bool,
        cut: impl Fn(&LookaheadEntry) -> bool,
        b_ok: impl Fn(&LookaheadEntry) -> bool,
    ) -> Vec<FrameType> {
        let Some(first) = window.first() else {
            return Vec::new();
        };
        let since = match self.since_idr {
            Some(since) if since < self.keyint && first.forced != PictureType::I && !cut(first) => since,
            _ => {
                self.since_idr = Some(1);
                return vec![FrameType::Idr];
            }
        };

        let max_group = self.max_b + 1;
        let mut n = 0;
        let mut closed = false;
        for (i, e) in window.iter().enumerate().take(max_group) {
            if i > 0 && (since + i as u32 >= self.keyint || e.forced == PictureType::I || cut(e)) {
                closed = true;
                break;
            }
            n = i + 1;
            if e.forced == PictureType::P || !b_ok(e) {
                closed = true;
                break;
            }
        }
        if !closed && n < max_group && !flushing {
            return Vec::new();
        }
        self.since_idr = Some(since + n as u32);
        let mut types = vec![FrameType::B; n - 1];
        types.push(FrameType::P);
        types
    }
}

/// 固定 GOP: 固定 B 帧数, 每 `keyint` 帧一个 IDR
#[derive(Debug, Clone)]
pub struct FixedGop {
    state: GopState,
}

impl FixedGop {
    pub fn new(keyint: u32, bframes: u32) -> Self {
        Self {
            state: GopState {
                keyint,
                max_b: bframes as usize,
                since_idr: None,
            },
        }
    }
}

impl FrameTypeDecider for FixedGop {
    fn decide(&mut self, window: &[LookaheadEntry], flushing: bool) -> Vec<FrameType> {
        self.state.plan(window, flushing, |_| false, |_| true)
    }

    fn reset(&mut self) {
        self.state.since_idr = None;
    }
}

/// 帧间代价不超过帧内代价的这个百分比时可以作为 B 帧
const B_INTER_PERCENT: u64 = 50;

/// 自适应 B 帧: 场景切换插入 IDR, 运动剧烈时提前结束 B 帧串
#[derive(Debug, Clone)]
pub struct AdaptiveB {
    state: GopState,
    scenecut_threshold: u64,
}

impl AdaptiveB {
    pub fn new(keyint: u32, bframes: u32, scenecut_threshold: u32) -> Self {
        Self {
            state: GopState {
                keyint,
                max_b: bframes as usize,
                since_idr: None,
            },
            scenecut_threshold: u64::from(scenecut_threshold.min(100)),
        }
    }

    /// 场景切换: 帧间代价接近帧内代价
    pub fn is_scenecut(&self, costs: &FrameCosts) -> bool {
        scenecut(self.scenecut_threshold, costs)
    }
}

fn scenecut(threshold: u64, costs: &FrameCosts) -> bool {
    threshold > 0 && costs.intra > 0 && costs.inter * 100 > costs.intra * (100 - threshold)
}

impl FrameTypeDecider for AdaptiveB {
    fn decide(&mut self, window: &[LookaheadEntry], flushing: bool) -> Vec<FrameType> {
        let threshold = self.scenecut_threshold;
        let cut = |e: &LookaheadEntry| scenecut(threshold, &e.costs);
        let b_ok = |e: &LookaheadEntry| e.costs.inter * 100 <= e.costs.intra * B_INTER_PERCENT;
        self.state.plan(window, flushing, cut, b_ok)
    }

    fn reset(&mut self) {
        self.state.since_idr = None;
    }
}

//! 模式决策: 失真代价函数、运动搜索与帧内模式选择.
//!
//! 代价函数和运动搜索都是可插拔的协作者 ([`CostFunction`] / [`MotionSearch`]),
//! [`Analyser`] 在它们之上加入码率估计 (lambda * 比特数) 并给出决策.

use tao264_core::bitwriter::se_size;

use super::frames::Plane;
use super::macroblock::MvRange;
use super::mc::mc_luma;
use super::tables::LAMBDA_TAB;
use super::predict::{
    BlockEdges, CHROMA_DC, CHROMA_PLANE, Edges4, I4_DC, I4_HU, I16_DC, I16_PLANE,
    chroma_mode_available, i4x4_mode_available, i16x16_mode_available, predict_4x4,
    predict_16x16, predict_chroma,
};

/// 失真代价函数
pub trait CostFunction: Send + Sync {
    /// 两个 `w x h` 块之间的代价
    fn cost(&self, a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32;
}

/// 绝对差和
#[derive(Debug, Clone, Copy, Default)]
pub struct Sad;

/// 4x4 Hadamard 变换后的绝对值和
#[derive(Debug, Clone, Copy, Default)]
pub struct Satd;

impl CostFunction for Sad {
    fn cost(&self, a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32 {
        sad(a, a_stride, b, b_stride, w, h)
    }
}

impl CostFunction for Satd {
    fn cost(&self, a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32 {
        satd(a, a_stride, b, b_stride, w, h)
    }
}

pub fn sad(a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32 {
    let mut sum = 0u32;
    for y in 0..h {
        let ra = &a[y * a_stride..y * a_stride + w];
        let rb = &b[y * b_stride..y * b_stride + w];
        sum += ra.iter().zip(rb).map(|(&x, &y)| u32::from(x.abs_diff(y))).sum::<u32>();
    }
    sum
}

fn hadamard_abs_sum<const N: usize>(d: &mut [[i32; N]; N]) -> u32 {
    fn butterfly<const N: usize>(v: &mut [i32; N]) {
        let mut len = 1;
        while len < N {
            for i in (0..N).step_by(2 * len) {
                for j in i..i + len {
                    let (p, q) = (v[j], v[j + len]);
                    v[j] = p + q;
                    v[j + len] = p - q;
                }
            }
            len *= 2;
        }
    }
    for row in d.iter_mut() {
        butterfly(row);
    }
    let mut sum = 0u32;
    for x in 0..N {
        let mut col: [i32; N] = std::array::from_fn(|y| d[y][x]);
        butterfly(&mut col);
        sum += col.iter().map(|v| v.unsigned_abs()).sum::<u32>();
    }
    sum
}

fn diff_block<const N: usize>(
    a: &[u8],
    a_stride: usize,
    b: &[u8],
    b_stride: usize,
    x0: usize,
    y0: usize,
) -> [[i32; N]; N] {
    std::array::from_fn(|y| {
        std::array::from_fn(|x| {
            i32::from(a[(y0 + y) * a_stride + x0 + x]) - i32::from(b[(y0 + y) * b_stride + x0 + x])
        })
    })
}

/// 以 4x4 为单位的 SATD, `w` / `h` 必须是 4 的倍数
pub fn satd(a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32 {
    let mut sum = 0;
    for y0 in (0..h).step_by(4) {
        for x0 in (0..w).step_by(4) {
            let mut d = diff_block::<4>(a, a_stride, b, b_stride, x0, y0);
            sum += hadamard_abs_sum(&mut d) >> 1;
        }
    }
    sum
}

/// 以 8x8 为单位的 SA8D, 与 [`satd`] 量纲相同
pub fn sa8d(a: &[u8], a_stride: usize, b: &[u8], b_stride: usize, w: usize, h: usize) -> u32 {
    let mut sum = 0;
    for y0 in (0..h).step_by(8) {
        for x0 in (0..w).step_by(8) {
            let mut d = diff_block::<8>(a, a_stride, b, b_stride, x0, y0);
            sum += (hadamard_abs_sum(&mut d) + 2) >> 2;
        }
    }
    sum
}

/// 运动矢量差的码率代价
#[inline]
pub fn mv_cost(lambda: u32, mv: [i16; 2], pmv: [i16; 2]) -> u32 {
    lambda * (se_size(i32::from(mv[0]) - i32::from(pmv[0])) + se_size(i32::from(mv[1]) - i32::from(pmv[1])))
}

/// ref_idx 的码率代价 (只有一个参考时不编码)
#[inline]
pub fn ref_cost(lambda: u32, ref_idx: usize, num_refs: usize) -> u32 {
    if num_refs > 1 { lambda * (ref_idx as u32 + 1) } else { 0 }
}

/// 一次运动搜索的输入
#[derive(Clone, Copy)]
pub struct SearchRequest<'a> {
    /// 源块样本
    pub src: &'a [u8],
    pub src_stride: usize,
    pub reference: &'a Plane,
    /// 块在图像中的位置 (亮度像素)
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
    /// 预测运动矢量 (1/4 像素)
    pub pmv: [i16; 2],
    pub range: MvRange,
    /// 整像素搜索半径
    pub me_range: i32,
    pub lambda: u32,
}

/// 运动搜索策略
pub trait MotionSearch: Send + Sync {
    /// 返回最佳运动矢量 (1/4 像素) 及其代价 (失真 + mvd 码率)
    fn search(&self, req: &SearchRequest<'_>, cost: &dyn CostFunction) -> ([i16; 2], u32);
}

/// 小菱形整像素搜索 + 半/四分之一像素细化
#[derive(Debug, Clone, Copy)]
pub struct DiamondSearch {
    /// 0 整像素, 1 半像素, 2 四分之一像素
    pub subpel_refine: u8,
}

impl Default for DiamondSearch {
    fn default() -> Self {
        Self { subpel_refine: 2 }
    }
}

const SQUARE: [[i16; 2]; 8] = [[-1, -1], [0, -1], [1, -1], [-1, 0], [1, 0], [-1, 1], [0, 1], [1, 1]];
const DIAMOND: [[i16; 2]; 4] = [[0, -1], [-1, 0], [1, 0], [0, 1]];

impl DiamondSearch {
    fn evaluate(&self, req: &SearchRequest<'_>, cost: &dyn CostFunction, mv: [i16; 2], scratch: &mut [u8; 256]) -> u32 {
        mc_luma(req.reference, req.x, req.y, mv, req.width, req.height, scratch, 16);
        cost.cost(req.src, req.src_stride, scratch, 16, req.width, req.height) + mv_cost(req.lambda, mv, req.pmv)
    }
}

impl MotionSearch for DiamondSearch {
    fn search(&self, req: &SearchRequest<'_>, cost: &dyn CostFunction) -> ([i16; 2], u32) {
        let mut scratch = [0u8; 256];
        let r = &req.range;
        let fpel = |v: i16, c: usize| ((i32::from(v) + 2) >> 2).clamp(r.fpel_min[c], r.fpel_max[c].max(r.fpel_min[c]));
        let start = [fpel(req.pmv[0], 0), fpel(req.pmv[1], 1)];

        let mut best = [(start[0] * 4) as i16, (start[1] * 4) as i16];
        let mut best_cost = self.evaluate(req, cost, best, &mut scratch);
        if start != [0, 0] && r.fpel_min[0] <= 0 && r.fpel_min[1] <= 0 && r.fpel_max[0] >= 0 && r.fpel_max[1] >= 0 {
            let c = self.evaluate(req, cost, [0, 0], &mut scratch);
            if c < best_cost {
                best = [0, 0];
                best_cost = c;
            }
        }

        let center = [i32::from(best[0]) >> 2, i32::from(best[1]) >> 2];
        for _ in 0..req.me_range.max(1) * 2 {
            let cur = [i32::from(best[0]) >> 2, i32::from(best[1]) >> 2];
            let mut improved = false;
            for d in DIAMOND {
                let p = [cur[0] + i32::from(d[0]), cur[1] + i32::from(d[1])];
                if (0..2).any(|c| p[c] < r.fpel_min[c] || p[c] > r.fpel_max[c] || (p[c] - center[c]).abs() > req.me_range) {
                    continue;
                }
                let mv = [(p[0] * 4) as i16, (p[1] * 4) as i16];
                let c = self.evaluate(req, cost, mv, &mut scratch);
                if c < best_cost {
                    best = mv;
                    best_cost = c;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }

        for step in [2i16, 1].into_iter().take(usize::from(self.subpel_refine.min(2))) {
            let center = best;
            for d in SQUARE {
                let mv = [center[0] + d[0] * step, center[1] + d[1] * step];
                if !r.contains(mv) {
                    continue;
                }
                let c = self.evaluate(req, cost, mv, &mut scratch);
                if c < best_cost {
                    best = mv;
                    best_cost = c;
                }
            }
        }
        (best, best_cost)
    }
}

/// 估计的模式码率 (比特)
const I16_MODE_BITS: u32 = 4;
const I4_PREDICTED_BITS: u32 = 1;
const I4_EXPLICIT_BITS: u32 = 4;
/// Intra4x4 宏块相对 Intra16x16 的额外开销
pub const I4_MB_OVERHEAD_BITS: u32 = 6;

/// 模式决策器
pub struct Analyser<'a> {
    cost: &'a dyn CostFunction,
    search: &'a dyn MotionSearch,
    lambda: u32,
    me_range: i32,
    lossless: bool,
}

impl<'a> Analyser<'a> {
    pub fn new(cost: &'a dyn CostFunction, search: &'a dyn MotionSearch, qp: u8, me_range: u32, lossless: bool) -> Self {
        Self {
            cost,
            search,
            lambda: u32::from(LAMBDA_TAB[usize::from(qp.min(51))]),
            me_range: me_range as i32,
            lossless,
        }
    }

    pub fn lambda(&self) -> u32 {
        self.lambda
    }

    /// 帧内候选的代价: 失真 + 模式码率
    pub fn intra_cost(&self, src: &[u8], pred: &[u8], stride: usize, size: usize, mode_bits: u32) -> u32 {
        self.cost.cost(src, stride, pred, stride, size, size) + self.lambda * mode_bits
    }

    /// 帧间候选的代价: 以给定运动矢量补偿后的失真 + mvd 码率
    #[allow(clippy::too_many_arguments)]
    pub fn inter_cost(
        &self,
        src: &[u8],
        src_stride: usize,
        reference: &Plane,
        x: i32,
        y: i32,
        width: usize,
        height: usize,
        mv: [i16; 2],
        pmv: [i16; 2],
    ) -> u32 {
        let mut pred = [0u8; 256];
        mc_luma(reference, x, y, mv, width, height, &mut pred, 16);
        self.cost.cost(src, src_stride, &pred, 16, width, height) + mv_cost(self.lambda, mv, pmv)
    }

    /// 在一个参考帧上搜索
    #[allow(clippy::too_many_arguments)]
    pub fn motion_search(
        &self,
        src: &[u8],
        src_stride: usize,
        reference: &Plane,
        x: i32,
        y: i32,
        width: usize,
        height: usize,
        pmv: [i16; 2],
        range: MvRange,
    ) -> ([i16; 2], u32) {
        let req = SearchRequest {
            src,
            src_stride,
            reference,
            x,
            y,
            width,
            height,
            pmv,
            range,
            me_range: self.me_range,
            lambda: self.lambda,
        };
        self.search.search(&req, self.cost)
    }

    /// 在所有参考帧上为一个分区选择参考与运动矢量
    ///
    /// `pmv_for` 给出参考索引对应的预测运动矢量. 返回 (参考索引, 运动矢量, 代价).
    #[allow(clippy::too_many_arguments)]
    pub fn search_refs(
        &self,
        src: &[u8],
        src_stride: usize,
        refs: &[&Plane],
        x: i32,
        y: i32,
        width: usize,
        height: usize,
        range: MvRange,
        pmv_for: impl Fn(i8) -> [i16; 2],
    ) -> (usize, [i16; 2], u32) {
        let mut best = (0, [0i16; 2], u32::MAX);
        for (i, reference) in refs.iter().enumerate() {
            let pmv = pmv_for(i as i8);
            let (mv, cost) = self.motion_search(src, src_stride, reference, x, y, width, height, pmv, range);
            let cost = cost.saturating_add(ref_cost(self.lambda, i, refs.len()));
            if cost < best.2 {
                best = (i, mv, cost);
            }
        }
        best
    }

    /// 选择 Intra16x16 模式, 返回 (模式, 代价)
    pub fn best_i16(&self, edges: &BlockEdges<16>, src: &[u8; 256]) -> (u8, u32) {
        let mut pred = [0u8; 256];
        let mut best = (I16_DC, u32::MAX);
        for mode in 0..4u8 {
            if !i16x16_mode_available(mode, edges) || (self.lossless && mode != I16_DC && mode != I16_PLANE) {
                continue;
            }
            predict_16x16(edges, mode, &mut pred);
            let cost = self.intra_cost(src, &pred, 16, 16, I16_MODE_BITS);
            if cost < best.1 {
                best = (mode, cost);
            }
        }
        best
    }

    /// 选择一个 4x4 块的帧内模式, 返回 (模式, 代价, 预测)
    pub fn best_i4(&self, edges: &Edges4, src: &[u8; 16], predicted: i8) -> (i8, u32, [u8; 16]) {
        let mut pred = [0u8; 16];
        let mut best = (I4_DC, u32::MAX, [0u8; 16]);
        for mode in 0..=I4_HU {
            // 无损模式下垂直/水平预测需要 DPCM 重建, 不使用
            if !i4x4_mode_available(mode, edges) || (self.lossless && mode < I4_DC) {
                continue;
            }
            predict_4x4(edges, mode, &mut pred);
            let bits = if mode == predicted { I4_PREDICTED_BITS } else { I4_EXPLICIT_BITS };
            let cost = self.intra_cost(src, &pred, 4, 4, bits);
            if cost < best.1 {
                best = (mode, cost, pred);
            }
        }
        best
    }

    /// 选择色度帧内模式 (两个平面共用)
    pub fn best_chroma(&self, edges: [&BlockEdges<8>; 2], src: [&[u8; 64]; 2]) -> u8 {
        let mut pred = [0u8; 64];
        let mut best = (CHROMA_DC, u32::MAX);
        for mode in 0..4u8 {
            if !chroma_mode_available(mode, edges[0]) || (self.lossless && mode != CHROMA_DC && mode != CHROMA_PLANE) {
                continue;
            }
            let mut cost = 0;
            for c in 0..2 {
                predict_chroma(edges[c], mode, &mut pred);
                cost += self.cost.cost(src[c], 8, &pred, 8, 8, 8);
            }
            if cost < best.1 {
                best = (mode, cost);
            }
        }
        best.0
    }

    /// 亮度残差选择 8x8 变换
    pub fn prefer_transform_8x8(&self, src: &[u8; 256], pred: &[u8; 256]) -> bool {
        sa8d(src, 16, pred, 16, 16, 16) < satd(src, 16, pred, 16, 16, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_for(mb_x: i32, mb_y: i32, mb_w: i32, mb_h: i32) -> MvRange {
        let min = [-4 * (16 * mb_x + 24), -4 * (16 * mb_y + 24)];
        let max = [4 * (16 * (mb_w - 1 - mb_x) + 24), 4 * (16 * (mb_h - 1 - mb_y) + 24)];
        MvRange {
            min,
            max,
            fpel_min: [(min[0] >> 2) + 1, (min[1] >> 2) + 1],
            fpel_max: [(max[0] >> 2) - 1, (max[1] >> 2) - 1],
        }
    }

    fn textured(w: usize, h: usize) -> Plane {
        let mut plane = Plane::new(w, h, 32);
        for y in 0..h {
            for (x, v) in plane.row_mut(y).iter_mut().enumerate() {
                *v = ((x * 37 + y * 11 + (x * y) % 7 * 19) % 256) as u8;
            }
        }
        plane.extend_edges();
        plane
    }

    /// 取参考平面 (x + dx, y + dy) 处的 16x16 块
    fn shifted_block(reference: &Plane, x: i32, y: i32, dx: i32, dy: i32) -> [u8; 256] {
        std::array::from_fn(|i| reference.at(x + (i % 16) as i32 + dx, y + (i / 16) as i32 + dy))
    }

    #[test]
    fn test_sad_and_satd() {
        let a = [10u8; 16];
        let b = [12u8; 16];
        assert_eq!(sad(&a, 4, &b, 4, 4, 4), 32);
        // 常数差只落在 DC: 16 * 2 / 2
        assert_eq!(satd(&a, 4, &b, 4, 4, 4), 16);
        let a = [10u8; 64];
        let b = [12u8; 64];
        assert_eq!(sa8d(&a, 8, &b, 8, 8, 8), 32);
        assert_eq!(satd(&a, 8, &b, 8, 8, 8), 64);
    }

    #[test]
    fn test_mv_and_ref_cost() {
        assert_eq!(mv_cost(2, [4, 0], [4, 0]), 4, "零差值各占 1 比特");
        assert_eq!(mv_cost(1, [5, -1], [4, 0]), 6);
        assert_eq!(ref_cost(3, 1, 1), 0);
        assert_eq!(ref_cost(3, 1, 2), 6);
    }

    #[test]
    fn test_diamond_search_finds_translation() {
        let reference = textured(64, 64);
        let search = DiamondSearch { subpel_refine: 2 };
        let analyser = Analyser::new(&Sad, &search, 26, 16, false);
        let range = range_for(1, 1, 4, 4);

        let src = shifted_block(&reference, 16, 16, 1, 0);
        let (mv, cost) = analyser.motion_search(&src, 16, &reference, 16, 16, 16, 16, [0, 0], range);
        assert_eq!(mv, [4, 0], "菱形第一步即命中 (+1, 0)");
        assert_eq!(cost, mv_cost(analyser.lambda(), mv, [0, 0]));

        let src = shifted_block(&reference, 16, 16, 3, -2);
        let (mv, cost) = analyser.motion_search(&src, 16, &reference, 16, 16, 16, 16, [12, -8], range);
        assert_eq!(mv, [12, -8], "从预测矢量出发命中 (+3, -2)");
        assert_eq!(cost, 2 * analyser.lambda());
    }

    #[test]
    fn test_i16_mode_for_flat_block() {
        let edges = BlockEdges::<16> {
            top: [90; 16],
            left: [90; 16],
            top_left: 90,
            has_top: true,
            has_left: true,
            has_top_left: true,
        };
        let src = [90u8; 256];
        let search = DiamondSearch::default();
        let analyser = Analyser::new(&Satd, &search, 26, 16, false);
        let (mode, cost) = analyser.best_i16(&edges, &src);
        assert_eq!(cost, 5 * I16_MODE_BITS);
        assert_eq!(mode, 0, "平坦块上所有模式代价相同, 取第一个可用模式");
    }

    #[test]
    fn test_lossless_restricts_i4_modes() {
        let edges = Edges4 {
            top: [50, 60, 70, 80, 80, 80, 80, 80],
            left: [50; 4],
            top_left: 50,
            has_top: true,
            has_left: true,
            has_top_left: true,
        };
        // 源块恰好等于垂直预测
        let mut src = [0u8; 16];
        for y in 0..4 {
            src[y * 4..y * 4 + 4].copy_from_slice(&[50, 60, 70, 80]);
        }
        let search = DiamondSearch::default();
        let lossy = Analyser::new(&Satd, &search, 26, 16, false);
        assert_eq!(lossy.best_i4(&edges, &src, 2).0, 0);
        let lossless = Analyser::new(&Satd, &search, 0, 16, true);
        assert!(lossless.best_i4(&edges, &src, 2).0 >= I4_DC);
    }
}

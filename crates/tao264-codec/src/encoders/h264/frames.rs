//! 帧缓冲与参考帧管理.
//!
//! 帧在四个互斥的池之间流转:
//!
//! ```text
//! intake -> pending --(类型决策)--> ready --(编码)--> reference --(标记释放)--> free
//!                                              \--(非参考 B 帧)------------------/
//! ```
//!
//! 参考池 (DPB) 的帧数永远不超过 SPS 的 num_ref_frames. 每个参考帧编码前先
//! 生成标记计划: 默认滑动窗口, 需要时改为显式 MMCO. 还未编码的 B 帧做时间
//! 直接预测要用到的帧 (前后锚点及后向锚点的参考帧) 会被钉住, 不会被释放.

use std::collections::VecDeque;

use log::debug;
use tao264_core::{TaoError, TaoResult};

use super::lookahead::FrameCosts;
use super::macroblock::MbRecord;
use super::slice_header::{MemoryOp, RefPicMarking, ReorderOp, SliceType};
use crate::frame::PictureType;

/// 亮度平面四周的填充宽度 (像素), 色度为一半
pub const FRAME_PAD: usize = 32;

/// 带填充边缘的像素平面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
    pub width: usize,
    pub height: usize,
    pub pad: usize,
}

impl Plane {
    pub fn new(width: usize, height: usize, pad: usize) -> Self {
        let stride = width + 2 * pad;
        Self {
            data: vec![0; stride * (height + 2 * pad)],
            stride,
            width,
            height,
            pad,
        }
    }

    /// 样本 (x, y) 在 `data` 中的下标, 坐标不含填充
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        (y + self.pad) * self.stride + x + self.pad
    }

    /// 读取样本, 坐标被限制在填充区域内
    #[inline]
    pub fn at(&self, x: i32, y: i32) -> u8 {
        let p = self.pad as i32;
        let x = x.clamp(-p, self.width as i32 + p - 1);
        let y = y.clamp(-p, self.height as i32 + p - 1);
        self.data[(y + p) as usize * self.stride + (x + p) as usize]
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let start = self.index(0, y);
        &self.data[start..start + self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = self.index(0, y);
        let width = self.width;
        &mut self.data[start..start + width]
    }

    /// 把图像边缘样本复制到填充区域
    pub fn extend_edges(&mut self) {
        let (pad, stride, w, h) = (self.pad, self.stride, self.width, self.height);
        if pad == 0 || w == 0 || h == 0 {
            return;
        }
        for y in 0..h {
            let row = (y + pad) * stride;
            let left = self.data[row + pad];
            let right = self.data[row + pad + w - 1];
            self.data[row..row + pad].fill(left);
            self.data[row + pad + w..row + stride].fill(right);
        }
        let first = pad * stride;
        let last = (pad + h - 1) * stride;
        for y in 0..pad {
            self.data.copy_within(first..first + stride, y * stride);
            self.data.copy_within(last..last + stride, (pad + h + y) * stride);
        }
    }

    /// 与另一平面可见区域的平方误差和
    pub fn sse(&self, other: &Plane) -> u64 {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        self.sse_region(other, self.width, self.height)
    }

    /// 左上角 `width` x `height` 区域的平方误差和
    pub fn sse_region(&self, other: &Plane, width: usize, height: usize) -> u64 {
        let width = width.min(self.width).min(other.width);
        let height = height.min(self.height).min(other.height);
        (0..height)
            .map(|y| {
                self.row(y)[..width]
                    .iter()
                    .zip(&other.row(y)[..width])
                    .map(|(&a, &b)| {
                        let d = i64::from(a) - i64::from(b);
                        (d * d) as u64
                    })
                    .sum::<u64>()
            })
            .sum()
    }

    /// 按宏块行区间把平面切成互不重叠的可写条带
    ///
    /// `rows` 必须从第 0 行开始连续递增, `unit` 为一个宏块行的样本行数.
    fn split_bands(&mut self, rows: &[(usize, usize)], unit: usize) -> Vec<PlaneBand<'_>> {
        let (stride, width, pad) = (self.stride, self.width, self.pad);
        let (_, mut rest) = self.data.split_at_mut(pad * stride);
        let mut bands = Vec::with_capacity(rows.len());
        for &(r0, r1) in rows {
            let (band, tail) = std::mem::take(&mut rest).split_at_mut((r1 - r0) * unit * stride);
            bands.push(PlaneBand {
                data: band,
                stride,
                width,
                pad,
                y_start: r0 * unit,
            });
            rest = tail;
        }
        bands
    }
}

/// 平面中属于一个 slice 的可写条带
#[derive(Debug)]
pub struct PlaneBand<'a> {
    pub data: &'a mut [u8],
    pub stride: usize,
    pub width: usize,
    pub pad: usize,
    /// 条带首行在平面中的行号
    pub y_start: usize,
}

impl PlaneBand<'_> {
    /// 平面坐标 (x, y) 在条带数据中的下标
    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        (y - self.y_start) * self.stride + x + self.pad
    }

    /// 平面坐标 (x, y) 对应的条带数组坐标, 供帧内预测收集边缘
    #[inline]
    pub fn origin(&self, x: usize, y: usize) -> (usize, usize) {
        (x + self.pad, y - self.y_start)
    }

    /// 写入一个 `w x h` 块
    pub fn put_block(&mut self, x: usize, y: usize, w: usize, h: usize, src: &[u8]) {
        for row in 0..h {
            let at = self.index(x, y + row);
            self.data[at..at + w].copy_from_slice(&src[row * w..row * w + w]);
        }
    }
}

/// YUV 4:2:0 三平面
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YuvPlanes {
    pub planes: [Plane; 3],
}

impl YuvPlanes {
    /// 亮度尺寸为 `width x height` (宏块对齐)
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            planes: [
                Plane::new(width, height, FRAME_PAD),
                Plane::new(width / 2, height / 2, FRAME_PAD / 2),
                Plane::new(width / 2, height / 2, FRAME_PAD / 2),
            ],
        }
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn extend_edges(&mut self) {
        for plane in &mut self.planes {
            plane.extend_edges();
        }
    }

    /// 按 slice 的宏块行区间切出三个平面的条带
    pub fn split_bands(&mut self, rows: &[(usize, usize)]) -> Vec<[PlaneBand<'_>; 3]> {
        let [y, u, v] = &mut self.planes;
        let ys = y.split_bands(rows, 16);
        let us = u.split_bands(rows, 8);
        let vs = v.split_bands(rows, 8);
        ys.into_iter()
            .zip(us)
            .zip(vs)
            .map(|((y, u), v)| [y, u, v])
            .collect()
    }
}

/// 编码帧类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Idr,
    P,
    B,
}

impl FrameType {
    pub fn slice_type(self) -> SliceType {
        match self {
            Self::Idr => SliceType::I,
            Self::P => SliceType::P,
            Self::B => SliceType::B,
        }
    }

    /// 是否作为参考帧
    pub fn is_reference(self) -> bool {
        self != Self::B
    }
}

/// 一帧的全部编码状态
#[derive(Debug, Clone)]
pub struct Frame {
    /// 显示顺序序号, 同时作为帧标识
    pub display_index: u64,
    pub pts: i64,
    pub duration: i64,
    /// 调用方请求的帧类型
    pub forced: PictureType,
    pub frame_type: FrameType,
    pub poc: i32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    /// 长期参考索引 (LongTermFrameIdx)
    pub long_term_idx: Option<u32>,
    pub source: YuvPlanes,
    pub recon: YuvPlanes,
    /// 半分辨率亮度, 前瞻代价估计用
    pub lowres: Plane,
    pub costs: FrameCosts,
    pub qp: u8,
    /// 全部宏块记录 (编码后)
    pub records: Vec<MbRecord>,
    /// 编码时两个参考列表的帧标识、POC 与长期标记, 供后续 B 帧做 col 映射
    pub ref_ids: [Vec<u64>; 2],
    pub ref_pocs: [Vec<i32>; 2],
    pub ref_long: [Vec<bool>; 2],
}

impl Frame {
    pub fn new(
        display_index: u64,
        pts: i64,
        duration: i64,
        forced: PictureType,
        source: YuvPlanes,
        recon: YuvPlanes,
        lowres: Plane,
    ) -> Self {
        Self {
            display_index,
            pts,
            duration,
            forced,
            frame_type: FrameType::P,
            poc: 0,
            frame_num: 0,
            idr_pic_id: 0,
            long_term_idx: None,
            source,
            recon,
            lowres,
            costs: FrameCosts::default(),
            qp: 0,
            records: Vec::new(),
            ref_ids: [Vec::new(), Vec::new()],
            ref_pocs: [Vec::new(), Vec::new()],
            ref_long: [Vec::new(), Vec::new()],
        }
    }

    pub fn is_long_term(&self) -> bool {
        self.long_term_idx.is_some()
    }

    /// 记录本帧编码所用的参考列表
    pub fn set_ref_lists(&mut self, lists: &RefLists) {
        for (list, entries) in lists.lists.iter().enumerate() {
            self.ref_ids[list] = entries.iter().map(|e| e.id).collect();
            self.ref_pocs[list] = entries.iter().map(|e| e.poc).collect();
            self.ref_long[list] = entries.iter().map(|e| e.long_term).collect();
        }
    }
}

/// 参考列表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEntry {
    pub id: u64,
    pub poc: i32,
    /// 短期参考为 PicNum (FrameNumWrap), 长期参考为 LongTermPicNum
    pub pic_num: i32,
    pub long_term: bool,
}

/// 一个 slice 的参考列表及其重排序命令
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefLists {
    pub lists: [Vec<RefEntry>; 2],
    pub reorder: [Vec<ReorderOp>; 2],
}

impl RefLists {
    pub fn num_active(&self) -> [u32; 2] {
        [self.lists[0].len() as u32, self.lists[1].len() as u32]
    }
}

/// P 帧默认 list0: 短期参考按 PicNum 降序, 其后长期参考按 LongTermPicNum 升序
pub fn default_list_p(entries: &[RefEntry]) -> Vec<RefEntry> {
    let mut short: Vec<RefEntry> = entries.iter().filter(|e| !e.long_term).copied().collect();
    let mut long: Vec<RefEntry> = entries.iter().filter(|e| e.long_term).copied().collect();
    short.sort_by(|a, b| b.pic_num.cmp(&a.pic_num));
    long.sort_by_key(|e| e.pic_num);
    short.extend(long);
    short
}

/// B 帧默认 list0/list1
///
/// list0: POC 小于当前的按 POC 降序, 再接 POC 大于当前的按升序;
/// list1 两段顺序相反. 长期参考按 LongTermPicNum 升序放在最后.
/// list1 与 list0 相同且多于一项时交换 list1 的前两项.
pub fn default_lists_b(entries: &[RefEntry], cur_poc: i32) -> (Vec<RefEntry>, Vec<RefEntry>) {
    let mut before: Vec<RefEntry> = entries
        .iter()
        .filter(|e| !e.long_term && e.poc < cur_poc)
        .copied()
        .collect();
    let mut after: Vec<RefEntry> = entries
        .iter()
        .filter(|e| !e.long_term && e.poc > cur_poc)
        .copied()
        .collect();
    let mut long: Vec<RefEntry> = entries.iter().filter(|e| e.long_term).copied().collect();
    before.sort_by(|a, b| b.poc.cmp(&a.poc));
    after.sort_by_key(|e| e.poc);
    long.sort_by_key(|e| e.pic_num);

    let mut l0 = before.clone();
    l0.extend_from_slice(&after);
    l0.extend_from_slice(&long);
    let mut l1 = after;
    l1.extend(before);
    l1.extend(long);
    if l1.len() > 1 && l1 == l0 {
        l1.swap(0, 1);
    }
    (l0, l1)
}

/// 生成把 `initial` 变为 `desired` 的重排序命令
///
/// 两者前 `desired.len()` 项相同时不需要命令. 否则为 `desired` 的每一项
/// 按顺序生成一条命令, 解码端依次插入后列表即等于 `desired`.
pub fn reorder_commands(initial: &[RefEntry], desired: &[RefEntry], curr_pic_num: i32, max_pic_num: i32) -> Vec<ReorderOp> {
    let n = desired.len();
    if initial.len() >= n && initial[..n] == *desired {
        return Vec::new();
    }
    let mut ops = Vec::with_capacity(n);
    let mut pred = curr_pic_num;
    for e in desired {
        if e.long_term {
            ops.push(ReorderOp::Long {
                long_term_pic_num: e.pic_num as u32,
            });
            continue;
        }
        let no_wrap = if e.pic_num < 0 { e.pic_num + max_pic_num } else { e.pic_num };
        let diff = no_wrap - pred;
        if diff < 0 {
            ops.push(ReorderOp::ShortSub {
                abs_diff_pic_num_minus1: (-diff - 1) as u32,
            });
        } else {
            ops.push(ReorderOp::ShortAdd {
                abs_diff_pic_num_minus1: (diff - 1) as u32,
            });
        }
        pred = no_wrap;
    }
    ops
}

/// 按解码端算法执行重排序命令
///
/// `candidates` 为全部可用参考, 命令引用的图像必须在其中.
pub fn apply_reordering(
    initial: &[RefEntry],
    ops: &[ReorderOp],
    candidates: &[RefEntry],
    curr_pic_num: i32,
    max_pic_num: i32,
    num_active: usize,
) -> TaoResult<Vec<RefEntry>> {
    let mut list: Vec<RefEntry> = initial.iter().take(num_active).copied().collect();
    let mut pred = curr_pic_num;
    for (ref_idx, op) in ops.iter().enumerate() {
        let target = match *op {
            ReorderOp::ShortSub {
                abs_diff_pic_num_minus1,
            }
            | ReorderOp::ShortAdd {
                abs_diff_pic_num_minus1,
            } => {
                let delta = abs_diff_pic_num_minus1 as i32 + 1;
                let mut no_wrap = if matches!(op, ReorderOp::ShortSub { .. }) {
                    pred - delta
                } else {
                    pred + delta
                };
                if no_wrap < 0 {
                    no_wrap += max_pic_num;
                } else if no_wrap >= max_pic_num {
                    no_wrap -= max_pic_num;
                }
                pred = no_wrap;
                let pic_num = if no_wrap > curr_pic_num {
                    no_wrap - max_pic_num
                } else {
                    no_wrap
                };
                candidates
                    .iter()
                    .find(|e| !e.long_term && e.pic_num == pic_num)
                    .copied()
            }
            ReorderOp::Long { long_term_pic_num } => candidates
                .iter()
                .find(|e| e.long_term && e.pic_num == long_term_pic_num as i32)
                .copied(),
        };
        let Some(target) = target else {
            return Err(TaoError::InvalidData(format!(
                "H264Enc: 重排序命令引用了不存在的参考帧: {:?}",
                op
            )));
        };
        list.insert(ref_idx.min(list.len()), target);
        if let Some(pos) = list.iter().skip(ref_idx + 1).position(|e| *e == target) {
            list.remove(ref_idx + 1 + pos);
        }
    }
    list.truncate(num_active);
    Ok(list)
}

/// 帧池
pub struct FramePools {
    pending: VecDeque<Frame>,
    ready: VecDeque<Frame>,
    dpb: Vec<Frame>,
    free: Vec<YuvPlanes>,
    /// 参考池上限 (SPS num_ref_frames)
    max_refs: usize,
    /// P 帧 list0 使用的短期参考数上限
    ref_frames: usize,
    max_frame_num: u32,
    /// MaxLongTermFrameIdx, `None` 表示没有长期帧索引
    max_long_term_idx: Option<u32>,
    prev_ref_frame_num: u32,
    idr_display_index: u64,
    idr_count: u32,
}

impl FramePools {
    pub fn new(max_refs: usize, ref_frames: usize, max_frame_num: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            dpb: Vec::with_capacity(max_refs + 1),
            free: Vec::new(),
            max_refs,
            ref_frames,
            max_frame_num,
            max_long_term_idx: None,
            prev_ref_frame_num: 0,
            idr_display_index: 0,
            idr_count: 0,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn reference_len(&self) -> usize {
        self.dpb.len()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn max_refs(&self) -> usize {
        self.max_refs
    }

    /// 取一份帧存储, 优先复用空闲池
    pub fn take_storage(&mut self, width: usize, height: usize) -> YuvPlanes {
        match self.free.iter().position(|p| p.planes[0].width == width && p.planes[0].height == height) {
            Some(pos) => self.free.swap_remove(pos),
            None => YuvPlanes::new(width, height),
        }
    }

    fn recycle(&mut self, frame: Frame) {
        self.free.push(frame.source);
        self.free.push(frame.recon);
    }

    /// 新帧进入待决策池
    pub fn intake(&mut self, frame: Frame) {
        self.pending.push_back(frame);
    }

    pub fn pending(&self) -> impl Iterator<Item = &Frame> {
        self.pending.iter()
    }

    /// 为待决策池前 `types.len()` 帧确定类型, 按编码顺序移入就绪池
    ///
    /// 最后一帧是锚点 (IDR/P), 其余必须是 B; 锚点先于这些 B 帧编码.
    pub fn promote(&mut self, types: &[FrameType]) -> TaoResult<()> {
        let Some((&anchor, bs)) = types.split_last() else {
            return Ok(());
        };
        if anchor == FrameType::B || bs.iter().any(|&t| t != FrameType::B) || types.len() > self.pending.len() {
            return Err(TaoError::Internal(format!(
                "H264Enc: 非法的帧类型组 {:?} (待决策 {} 帧)",
                types,
                self.pending.len()
            )));
        }
        let mut group: Vec<Frame> = self.pending.drain(..types.len()).collect();
        for (frame, &t) in group.iter_mut().zip(types) {
            frame.frame_type = t;
        }
        if let Some(anchor) = group.pop() {
            self.ready.push_back(anchor);
        }
        self.ready.extend(group);
        Ok(())
    }

    /// 取出下一帧待编码帧 (编码顺序), 并分配 frame_num / POC / idr_pic_id
    pub fn next_ready(&mut self) -> Option<Frame> {
        let mut frame = self.ready.pop_front()?;
        if frame.frame_type == FrameType::Idr {
            self.idr_display_index = frame.display_index;
            frame.frame_num = 0;
            frame.idr_pic_id = self.idr_count & 1;
            self.idr_count += 1;
        } else {
            frame.frame_num = (self.prev_ref_frame_num + 1) % self.max_frame_num;
        }
        frame.poc = 2 * frame.display_index.saturating_sub(self.idr_display_index) as i32;
        Some(frame)
    }

    /// 查询参考池中的帧
    pub fn reference(&self, id: u64) -> Option<&Frame> {
        self.dpb.iter().find(|f| f.display_index == id)
    }

    pub fn references(&self) -> &[Frame] {
        &self.dpb
    }

    fn entry(&self, f: &Frame, cur_frame_num: u32) -> RefEntry {
        let pic_num = match f.long_term_idx {
            Some(idx) => idx as i32,
            None if f.frame_num > cur_frame_num => f.frame_num as i32 - self.max_frame_num as i32,
            None => f.frame_num as i32,
        };
        RefEntry {
            id: f.display_index,
            poc: f.poc,
            pic_num,
            long_term: f.long_term_idx.is_some(),
        }
    }

    /// 构建当前帧的参考列表
    ///
    /// P 帧使用最近的 `ref_frames` 个短期参考加全部长期参考 (`exclude_long` 时
    /// 不含长期参考), 期望顺序按 POC 距离由近到远, 与默认顺序不同时生成重排序命令.
    /// B 帧使用默认顺序的全部参考.
    pub fn build_ref_lists(&self, cur: &Frame, exclude_long: bool) -> RefLists {
        let entries: Vec<RefEntry> = self
            .dpb
            .iter()
            .filter(|f| !(exclude_long && f.is_long_term()))
            .map(|f| self.entry(f, cur.frame_num))
            .collect();
        match cur.frame_type {
            FrameType::Idr => RefLists::default(),
            FrameType::P => {
                let initial = default_list_p(&entries);
                let mut active: Vec<RefEntry> = initial
                    .iter()
                    .filter(|e| !e.long_term)
                    .take(self.ref_frames)
                    .copied()
                    .collect();
                active.extend(initial.iter().filter(|e| e.long_term));
                active.sort_by_key(|e| ((e.poc - cur.poc).abs(), e.long_term));
                let reorder = reorder_commands(&initial, &active, cur.frame_num as i32, self.max_frame_num as i32);
                RefLists {
                    lists: [active, Vec::new()],
                    reorder: [reorder, Vec::new()],
                }
            }
            FrameType::B => {
                let (l0, l1) = default_lists_b(&entries, cur.poc);
                RefLists {
                    lists: [l0, l1],
                    reorder: [Vec::new(), Vec::new()],
                }
            }
        }
    }

    /// 还未编码的 B 帧需要保留的参考帧
    ///
    /// 对就绪池中的每个 B 帧: 前后锚点, 以及后向锚点 (col 图像) 编码时引用的帧.
    fn pinned_ids(&self, cur: &Frame) -> Vec<u64> {
        let mut pinned = Vec::new();
        let anchors = || self.dpb.iter().chain(std::iter::once(cur));
        for b in self.ready.iter().filter(|f| f.frame_type == FrameType::B) {
            if let Some(col) = anchors()
                .filter(|f| f.display_index > b.display_index)
                .min_by_key(|f| f.display_index)
            {
                pinned.push(col.display_index);
                pinned.extend(col.ref_ids.iter().flatten());
            }
            if let Some(prev) = anchors()
                .filter(|f| f.display_index < b.display_index)
                .max_by_key(|f| f.display_index)
            {
                pinned.push(prev.display_index);
            }
        }
        pinned.sort_unstable();
        pinned.dedup();
        pinned
    }

    /// 生成当前帧的参考标记计划
    ///
    /// `mark_long` 请求把当前 P 帧标记为长期参考; 已有长期帧仍被钉住时推迟标记.
    /// 需要释放帧却没有可释放的短期参考时返回 `ResourceExhausted`.
    pub fn plan_marking(&self, cur: &Frame, mark_long: bool) -> TaoResult<RefPicMarking> {
        match cur.frame_type {
            FrameType::B => return Ok(RefPicMarking::None),
            FrameType::Idr => return Ok(RefPicMarking::Idr { long_term: false }),
            FrameType::P => {}
        }
        let pinned = self.pinned_ids(cur);
        let mut shorts: Vec<(i32, u64)> = self
            .dpb
            .iter()
            .filter(|f| !f.is_long_term())
            .map(|f| (self.entry(f, cur.frame_num).pic_num, f.display_index))
            .collect();
        shorts.sort_unstable();
        let victim = shorts.iter().find(|(_, id)| !pinned.contains(id)).copied();
        let forget = |(pic_num, _): (i32, u64)| MemoryOp::ForgetShort {
            difference_of_pic_nums_minus1: (cur.frame_num as i32 - pic_num - 1) as u32,
        };

        let old_long = self.dpb.iter().find(|f| f.long_term_idx == Some(0));
        let mark_long = mark_long && old_long.is_none_or(|f| !pinned.contains(&f.display_index));
        let freed = usize::from(mark_long && old_long.is_some());
        let full = self.dpb.len() + 1 - freed > self.max_refs;

        let exhausted = || {
            TaoError::ResourceExhausted(format!(
                "H264Enc: 参考帧池已满 ({} 帧) 且没有可释放的短期参考",
                self.dpb.len()
            ))
        };

        if !mark_long {
            if !full {
                return Ok(RefPicMarking::SlidingWindow);
            }
            let oldest = shorts.first().copied();
            return match (oldest, victim) {
                (Some(o), Some(v)) if o == v => Ok(RefPicMarking::SlidingWindow),
                (_, Some(v)) => Ok(RefPicMarking::Adaptive(vec![forget(v)])),
                (_, None) => Err(exhausted()),
            };
        }

        let mut ops = Vec::with_capacity(3);
        if self.max_long_term_idx.is_none() {
            ops.push(MemoryOp::TrimLong {
                max_long_term_frame_idx_plus1: 1,
            });
        }
        if full {
            ops.push(forget(victim.ok_or_else(exhausted)?));
        }
        ops.push(MemoryOp::MarkCurrentLong { long_term_frame_idx: 0 });
        Ok(RefPicMarking::Adaptive(ops))
    }

    /// 执行标记计划并把编码完成的帧放入参考池或空闲池
    ///
    /// 只有完整编码的帧才会进入参考池.
    pub fn commit(&mut self, mut frame: Frame, marking: &RefPicMarking) -> TaoResult<()> {
        match marking {
            RefPicMarking::None => {
                self.recycle(frame);
                return Ok(());
            }
            RefPicMarking::Idr { long_term } => {
                let old: Vec<Frame> = self.dpb.drain(..).collect();
                for f in old {
                    self.recycle(f);
                }
                self.max_long_term_idx = long_term.then_some(0);
                frame.long_term_idx = long_term.then_some(0);
            }
            RefPicMarking::SlidingWindow => {
                if self.dpb.len() >= self.max_refs {
                    let oldest = self
                        .dpb
                        .iter()
                        .enumerate()
                        .filter(|(_, f)| !f.is_long_term())
                        .min_by_key(|(_, f)| self.entry(f, frame.frame_num).pic_num)
                        .map(|(i, _)| i);
                    let Some(i) = oldest else {
                        return Err(TaoError::ResourceExhausted(
                            "H264Enc: 滑动窗口没有可移除的短期参考".into(),
                        ));
                    };
                    let f = self.dpb.remove(i);
                    debug!("H264Enc: 滑动窗口移除参考帧 #{}", f.display_index);
                    self.recycle(f);
                }
            }
            RefPicMarking::Adaptive(ops) => {
                for op in ops {
                    self.apply_memory_op(&mut frame, op)?;
                }
            }
        }

        if self.dpb.len() >= self.max_refs {
            return Err(TaoError::ResourceExhausted(format!(
                "H264Enc: 参考帧池超出上限 {}",
                self.max_refs
            )));
        }
        self.prev_ref_frame_num = frame.frame_num;
        self.dpb.push(frame);
        Ok(())
    }

    fn remove_where(&mut self, pred: impl Fn(&Frame) -> bool) {
        let mut i = 0;
        while i < self.dpb.len() {
            if pred(&self.dpb[i]) {
                let f = self.dpb.remove(i);
                self.recycle(f);
            } else {
                i += 1;
            }
        }
    }

    fn apply_memory_op(&mut self, cur: &mut Frame, op: &MemoryOp) -> TaoResult<()> {
        let cur_frame_num = cur.frame_num;
        let short_by_pic_num = |pools: &Self, diff: u32| {
            let pic_num = cur_frame_num as i32 - (diff as i32 + 1);
            pools
                .dpb
                .iter()
                .position(|f| !f.is_long_term() && pools.entry(f, cur_frame_num).pic_num == pic_num)
        };
        match *op {
            MemoryOp::ForgetShort {
                difference_of_pic_nums_minus1,
            } => {
                let Some(i) = short_by_pic_num(self, difference_of_pic_nums_minus1) else {
                    return Err(TaoError::InvalidData("H264Enc: MMCO 引用了不存在的短期参考".into()));
                };
                let f = self.dpb.remove(i);
                debug!("H264Enc: MMCO 移除短期参考帧 #{}", f.display_index);
                self.recycle(f);
            }
            MemoryOp::ForgetLong { long_term_pic_num } => {
                self.remove_where(|f| f.long_term_idx == Some(long_term_pic_num));
            }
            MemoryOp::ShortToLong {
                difference_of_pic_nums_minus1,
                long_term_frame_idx,
            } => {
                let Some(i) = short_by_pic_num(self, difference_of_pic_nums_minus1) else {
                    return Err(TaoError::InvalidData("H264Enc: MMCO 引用了不存在的短期参考".into()));
                };
                let id = self.dpb[i].display_index;
                self.remove_where(|f| f.long_term_idx == Some(long_term_frame_idx) && f.display_index != id);
                if let Some(f) = self.dpb.iter_mut().find(|f| f.display_index == id) {
                    f.long_term_idx = Some(long_term_frame_idx);
                }
            }
            MemoryOp::TrimLong {
                max_long_term_frame_idx_plus1,
            } => {
                let max = max_long_term_frame_idx_plus1.checked_sub(1);
                self.remove_where(|f| match (f.long_term_idx, max) {
                    (Some(idx), Some(max)) => idx > max,
                    (Some(_), None) => true,
                    (None, _) => false,
                });
                self.max_long_term_idx = max;
            }
            MemoryOp::ClearAll => {
                let old: Vec<Frame> = self.dpb.drain(..).collect();
                for f in old {
                    self.recycle(f);
                }
                self.max_long_term_idx = None;
            }
            MemoryOp::MarkCurrentLong { long_term_frame_idx } => {
                self.remove_where(|f| f.long_term_idx == Some(long_term_frame_idx));
                cur.long_term_idx = Some(long_term_frame_idx);
            }
        }
        Ok(())
    }

    /// 丢弃编码失败的帧: 存储回收, 参考池不受影响
    pub fn discard(&mut self, frame: Frame) {
        self.recycle(frame);
    }

    /// 清空全部池
    pub fn clear(&mut self) {
        let frames: Vec<Frame> = self
            .pending
            .drain(..)
            .chain(self.ready.drain(..))
            .chain(self.dpb.drain(..))
            .collect();
        for f in frames {
            self.recycle(f);
        }
        self.max_long_term_idx = None;
        self.prev_ref_frame_num = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(display: u64) -> Frame {
        Frame::new(
            display,
            display as i64,
            1,
            PictureType::None,
            YuvPlanes::new(16, 16),
            YuvPlanes::new(16, 16),
            Plane::new(8, 8, 0),
        )
    }

    fn short(id: u64, poc: i32, pic_num: i32) -> RefEntry {
        RefEntry {
            id,
            poc,
            pic_num,
            long_term: false,
        }
    }

    /// 按帧类型序列模拟编码: 每组锚点先编码, 返回每个参考帧提交后的参考池大小
    fn run_gop(pools: &mut FramePools, groups: &[&[FrameType]], long_every: u32) -> Vec<usize> {
        let mut display = 0u64;
        let mut sizes = Vec::new();
        let mut p_count = 0;
        for group in groups {
            for _ in 0..group.len() {
                pools.intake(frame(display));
                display += 1;
            }
            pools.promote(group).unwrap();
            while let Some(mut f) = pools.next_ready() {
                let mark_long = f.frame_type == FrameType::P && long_every > 0 && {
                    p_count += 1;
                    p_count % long_every == 0
                };
                let lists = pools.build_ref_lists(&f, mark_long);
                f.set_ref_lists(&lists);
                let marking = pools.plan_marking(&f, mark_long).unwrap();
                pools.commit(f, &marking).unwrap();
                sizes.push(pools.reference_len());
            }
        }
        sizes
    }

    #[test]
    fn test_plane_edges_replicated() {
        let mut plane = Plane::new(4, 2, 2);
        plane.row_mut(0).copy_from_slice(&[1, 2, 3, 4]);
        plane.row_mut(1).copy_from_slice(&[5, 6, 7, 8]);
        plane.extend_edges();
        assert_eq!(plane.at(-2, -2), 1);
        assert_eq!(plane.at(5, -1), 4);
        assert_eq!(plane.at(-1, 3), 5);
        assert_eq!(plane.at(100, 100), 8, "超出填充区域的坐标应被限制");
    }

    #[test]
    fn test_split_bands_cover_rows() {
        let mut planes = YuvPlanes::new(32, 48);
        {
            let mut bands = planes.split_bands(&[(0, 1), (1, 3)]);
            assert_eq!(bands.len(), 2);
            assert_eq!(bands[1][0].y_start, 16);
            assert_eq!(bands[1][1].y_start, 8);
            let at = bands[1][0].index(3, 20);
            bands[1][0].data[at] = 77;
        }
        assert_eq!(planes.luma().row(20)[3], 77);
    }

    #[test]
    fn test_default_b_lists_swap_when_equal() {
        // 只有过去的参考时 list1 与 list0 相同, 交换前两项
        let entries = [short(0, 0, 0), short(2, 4, 1)];
        let (l0, l1) = default_lists_b(&entries, 6);
        assert_eq!(l0.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 0]);
        assert_eq!(l1.iter().map(|e| e.id).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_reorder_commands_reproduce_desired_order() {
        let candidates = [
            short(1, 2, 3),
            short(2, 4, 4),
            short(3, 6, 5),
            RefEntry {
                id: 9,
                poc: 10,
                pic_num: 0,
                long_term: true,
            },
        ];
        let initial = default_list_p(&candidates);
        assert_eq!(initial.iter().map(|e| e.id).collect::<Vec<_>>(), vec![3, 2, 1, 9]);
        let desired = vec![candidates[3], candidates[2], candidates[0]];
        let ops = reorder_commands(&initial, &desired, 6, 16);
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0], ReorderOp::Long { long_term_pic_num: 0 });
        let out = apply_reordering(&initial, &ops, &candidates, 6, 16, 3).unwrap();
        assert_eq!(out, desired);

        assert!(reorder_commands(&initial, &initial[..2], 6, 16).is_empty());
    }

    #[test]
    fn test_reorder_with_wrapped_pic_num() {
        // frame_num 回绕: 当前 1, 参考 15 (PicNum -1) 与 0
        let candidates = [short(1, 2, -1), short(2, 4, 0)];
        let initial = default_list_p(&candidates);
        let desired = vec![candidates[0], candidates[1]];
        let ops = reorder_commands(&initial, &desired, 1, 16);
        assert!(!ops.is_empty());
        let out = apply_reordering(&initial, &ops, &candidates, 1, 16, 2).unwrap();
        assert_eq!(out, desired);
    }

    #[test]
    fn test_encode_order_and_numbering() {
        let mut pools = FramePools::new(4, 3, 16);
        for i in 0..4 {
            pools.intake(frame(i));
        }
        pools.promote(&[FrameType::Idr]).unwrap();
        pools.promote(&[FrameType::B, FrameType::B, FrameType::P]).unwrap();
        let order: Vec<(u64, u32, i32)> = std::iter::from_fn(|| {
            let f = pools.next_ready()?;
            let out = (f.display_index, f.frame_num, f.poc);
            let marking = if f.frame_type.is_reference() {
                RefPicMarking::SlidingWindow
            } else {
                RefPicMarking::None
            };
            let marking = if f.frame_type == FrameType::Idr {
                RefPicMarking::Idr { long_term: false }
            } else {
                marking
            };
            pools.commit(f, &marking).unwrap();
            Some(out)
        })
        .collect();
        assert_eq!(order, vec![(0, 0, 0), (3, 1, 6), (1, 2, 2), (2, 2, 4)]);
        assert_eq!(pools.reference_len(), 2);
        assert_eq!(pools.free_len(), 4, "两个 B 帧的存储应回到空闲池");
    }

    #[test]
    fn test_promote_rejects_b_anchor() {
        let mut pools = FramePools::new(2, 1, 16);
        pools.intake(frame(0));
        pools.intake(frame(1));
        assert!(matches!(
            pools.promote(&[FrameType::P, FrameType::B]),
            Err(TaoError::Internal(_))
        ));
    }

    #[test]
    fn test_reference_pool_never_exceeds_limit() {
        let mut pools = FramePools::new(2, 1, 16);
        let groups: Vec<&[FrameType]> = vec![
            &[FrameType::Idr],
            &[FrameType::P],
            &[FrameType::B, FrameType::P],
            &[FrameType::B, FrameType::P],
            &[FrameType::P],
            &[FrameType::B, FrameType::P],
        ];
        let sizes = run_gop(&mut pools, &groups, 0);
        assert!(sizes.iter().all(|&n| n <= 2), "参考池大小 {:?}", sizes);
        assert_eq!(*sizes.last().unwrap(), 2);
    }

    #[test]
    fn test_long_term_marking_within_limit() {
        // ref_frames 1, B 帧 1, 长期参考: num_ref_frames = 3
        let mut pools = FramePools::new(3, 1, 16);
        let groups: Vec<&[FrameType]> = vec![
            &[FrameType::Idr],
            &[FrameType::B, FrameType::P],
            &[FrameType::B, FrameType::P],
            &[FrameType::B, FrameType::P],
            &[FrameType::B, FrameType::P],
            &[FrameType::P],
        ];
        let sizes = run_gop(&mut pools, &groups, 2);
        assert!(sizes.iter().all(|&n| n <= 3), "参考池大小 {:?}", sizes);
        let longs = pools.references().iter().filter(|f| f.is_long_term()).count();
        assert_eq!(longs, 1, "同时只保留一个长期参考帧");
    }

    #[test]
    fn test_pinned_col_refs_are_not_released() {
        // num_ref_frames 2: I0 P1 之后编码 P3, 其 B2 尚未编码
        let mut pools = FramePools::new(2, 1, 16);
        run_gop(&mut pools, &[&[FrameType::Idr], &[FrameType::P]], 0);
        pools.intake(frame(2));
        pools.intake(frame(3));
        pools.promote(&[FrameType::B, FrameType::P]).unwrap();
        let mut p3 = pools.next_ready().unwrap();
        let lists = pools.build_ref_lists(&p3, false);
        p3.set_ref_lists(&lists);
        assert_eq!(p3.ref_ids[0], vec![1]);
        let marking = pools.plan_marking(&p3, false).unwrap();
        pools.commit(p3, &marking).unwrap();
        let ids: Vec<u64> = pools.references().iter().map(|f| f.display_index).collect();
        assert!(ids.contains(&1) && ids.contains(&3), "B2 的前后锚点必须保留: {:?}", ids);
    }

    #[test]
    fn test_forget_short_when_oldest_is_pinned() {
        // num_ref_frames 3, 参考池 I0 P1 P2; 就绪池的 B5 经由 col 图像需要 I0, 前向锚点为 P2
        let mut pools = FramePools::new(3, 3, 16);
        run_gop(&mut pools, &[&[FrameType::Idr], &[FrameType::P], &[FrameType::P]], 0);
        let mut b = frame(5);
        b.frame_type = FrameType::B;
        pools.ready.push_back(b);
        let mut cur = frame(6);
        cur.frame_num = 3;
        cur.ref_ids = [vec![0], Vec::new()];
        let marking = pools.plan_marking(&cur, false).unwrap();
        // 释放 P1: PicNum 1, 3 - 1 - 1 = 1
        assert_eq!(
            marking,
            RefPicMarking::Adaptive(vec![MemoryOp::ForgetShort {
                difference_of_pic_nums_minus1: 1
            }])
        );
        pools.commit(cur, &marking).unwrap();
        let ids: Vec<u64> = pools.references().iter().map(|f| f.display_index).collect();
        assert_eq!(ids, vec![0, 2, 6]);
    }

    #[test]
    fn test_exhausted_when_everything_pinned() {
        let mut pools = FramePools::new(1, 1, 16);
        run_gop(&mut pools, &[&[FrameType::Idr]], 0);
        let mut b = frame(5);
        b.frame_type = FrameType::B;
        pools.ready.push_back(b);
        let mut cur = frame(6);
        cur.frame_num = 1;
        cur.ref_ids = [vec![0], Vec::new()];
        assert!(matches!(
            pools.plan_marking(&cur, false),
            Err(TaoError::ResourceExhausted(_))
        ));
    }
}

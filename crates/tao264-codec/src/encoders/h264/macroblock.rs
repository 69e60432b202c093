//! 宏块上下文: 宏块记录库、scan8 邻居缓存、可用性与运动矢量预测.
//!
//! 每个 slice 任务独占一个 [`MacroblockContext`]. 记录库只覆盖本 slice 的
//! 宏块范围, 邻居查询以 (行, 列) 下标计算并检查 slice/帧边界,
//! 只有已经提交的宏块可见.
//!
//! 邻居缓存布局 (stride 8, 共 5 行):
//!
//! ```text
//!   idx:  0  1  2  3  4  5  6  7 | 8 (右上宏块)
//!   row0  .  .  .  D  B  B  B  B
//!   row1  .  .  .  A  x  x  x  x
//!   row2  .  .  .  A  x  x  x  x
//!   row3  .  .  .  A  x  x  x  x
//!   row4  .  .  .  A  x  x  x  x
//! ```
//!
//! 第 1 行第 0 列 (索引 8) 复用为右上宏块左下角 4x4 块.

use super::tables::{RASTER_BLOCK, block8_of_raster};

/// 邻居缓存宽度
pub const CACHE_STRIDE: usize = 8;
/// 邻居缓存大小
pub const CACHE_SIZE: usize = 40;

/// 参考索引: 邻居不可用
pub const REF_UNAVAILABLE: i8 = -2;
/// 参考索引: 可用但未使用该列表 (帧内或单向预测)
pub const REF_NOT_USED: i8 = -1;
/// 非零系数个数: 邻居不可用
pub const NNZ_UNAVAILABLE: u8 = 0x80;

/// 运动矢量可越出图像的边缘宽度 (像素)
pub const MV_EDGE_MARGIN: i32 = 24;

/// 邻居可用性位掩码
pub const NB_LEFT: u8 = 1;
pub const NB_TOP: u8 = 2;
pub const NB_TOPRIGHT: u8 = 4;
pub const NB_TOPLEFT: u8 = 8;

/// 4x4 块光栅索引 (by * 4 + bx) 对应的缓存索引
#[inline]
pub const fn scan8(raster: usize) -> usize {
    12 + (raster & 3) + (raster >> 2) * CACHE_STRIDE
}

/// 宏块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MbType {
    /// Intra 4x4
    #[default]
    I4x4,
    /// Intra 16x16
    I16x16,
    /// P_L0_16x16
    P16x16,
    /// P_L0_L0_16x8
    P16x8,
    /// P_L0_L0_8x16
    P8x16,
    /// P_8x8 (子块均为 8x8)
    P8x8,
    /// P_Skip
    PSkip,
    /// B_Direct_16x16
    BDirect,
    /// B_L0_16x16
    BL0,
    /// B_L1_16x16
    BL1,
    /// B_Bi_16x16
    BBi,
    /// B_Skip
    BSkip,
}

impl MbType {
    /// 帧内宏块
    pub const fn is_intra(self) -> bool {
        matches!(self, Self::I4x4 | Self::I16x16)
    }

    /// 跳过宏块 (不编码残差与预测信息)
    pub const fn is_skip(self) -> bool {
        matches!(self, Self::PSkip | Self::BSkip)
    }

    /// 运动信息由直接预测推导 (B_Skip / B_Direct_16x16)
    pub const fn is_direct(self) -> bool {
        matches!(self, Self::BSkip | Self::BDirect)
    }

    /// 是否使用参考列表 `list`
    pub const fn uses_list(self, list: usize) -> bool {
        match self {
            Self::P16x16 | Self::P16x8 | Self::P8x16 | Self::P8x8 | Self::PSkip | Self::BL0 => {
                list == 0
            }
            Self::BL1 => list == 1,
            Self::BBi | Self::BDirect | Self::BSkip => true,
            Self::I4x4 | Self::I16x16 => false,
        }
    }

    /// 统计直方图中的序号
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 类型总数
    pub const COUNT: usize = 12;
}

/// 已提交宏块的持久记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbRecord {
    pub mb_type: MbType,
    /// 宏块 QP (亮度)
    pub qp: u8,
    /// coded_block_pattern: 低 4 位亮度, 高 2 位色度 (0..=2)
    pub cbp: u8,
    pub transform_8x8: bool,
    /// Intra4x4 预测模式, 光栅顺序
    pub intra4x4_modes: [i8; 16],
    /// Intra16x16 预测模式
    pub i16_mode: u8,
    pub chroma_pred_mode: u8,
    /// 每个 8x8 块的参考索引 [列表][8x8 块]
    pub ref_idx: [[i8; 4]; 2],
    /// 每个 4x4 块的运动矢量 (1/4 像素) [列表][光栅]
    pub mv: [[[i16; 2]; 16]; 2],
    /// 每个 4x4 块的 |mvd| [列表][光栅]
    pub mvd: [[[u16; 2]; 16]; 2],
    /// 非零系数个数: 0..16 亮度 (光栅), 16..20 Cb, 20..24 Cr
    pub nnz: [u8; 24],
    /// DC coded_block_flag: bit0 亮度, bit1 Cb, bit2 Cr
    pub dc_cbf: u8,
}

impl Default for MbRecord {
    fn default() -> Self {
        Self {
            mb_type: MbType::I16x16,
            qp: 26,
            cbp: 0,
            transform_8x8: false,
            intra4x4_modes: [2; 16],
            i16_mode: 2,
            chroma_pred_mode: 0,
            ref_idx: [[REF_NOT_USED; 4]; 2],
            mv: [[[0; 2]; 16]; 2],
            mvd: [[[0; 2]; 16]; 2],
            nnz: [0; 24],
            dc_cbf: 0,
        }
    }
}

/// 运动矢量范围 (1/4 像素与整像素)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MvRange {
    pub min: [i32; 2],
    pub max: [i32; 2],
    pub fpel_min: [i32; 2],
    pub fpel_max: [i32; 2],
}

impl MvRange {
    /// 把运动矢量限制在范围内
    pub fn clip(&self, mv: [i16; 2]) -> [i16; 2] {
        [
            i32::from(mv[0]).clamp(self.min[0], self.max[0]) as i16,
            i32::from(mv[1]).clamp(self.min[1], self.max[1]) as i16,
        ]
    }

    pub fn contains(&self, mv: [i16; 2]) -> bool {
        (0..2).all(|c| (self.min[c]..=self.max[c]).contains(&i32::from(mv[c])))
    }
}

/// 中值
#[inline]
fn median(a: i16, b: i16, c: i16) -> i16 {
    a.max(b).min(a.min(b).max(c))
}

/// 宏块上下文
pub struct MacroblockContext {
    mb_width: usize,
    mb_height: usize,
    first_mb: usize,
    end_mb: usize,
    records: Vec<MbRecord>,
    /// 已提交的宏块数
    committed: usize,

    pub mb_x: usize,
    pub mb_y: usize,
    pub mb_xy: usize,
    /// 邻居可用性 (NB_* 位掩码)
    pub avail: u8,
    /// 当前宏块的运动矢量范围
    pub mv_range: MvRange,
    row_range: Option<(usize, [i32; 2], [i32; 2])>,

    pub intra4x4: [i8; CACHE_SIZE],
    pub nnz: [u8; CACHE_SIZE],
    pub refs: [[i8; CACHE_SIZE]; 2],
    pub mvs: [[[i16; 2]; CACHE_SIZE]; 2],
    pub mvds: [[[u16; 2]; CACHE_SIZE]; 2],
    pub direct: [bool; CACHE_SIZE],
}

impl MacroblockContext {
    /// 为宏块范围 `[first_mb, end_mb)` 创建上下文
    pub fn new(mb_width: usize, mb_height: usize, first_mb: usize, end_mb: usize) -> Self {
        debug_assert!(first_mb <= end_mb && end_mb <= mb_width * mb_height);
        Self {
            mb_width,
            mb_height,
            first_mb,
            end_mb,
            records: Vec::with_capacity(end_mb - first_mb),
            committed: 0,
            mb_x: 0,
            mb_y: 0,
            mb_xy: first_mb,
            avail: 0,
            mv_range: MvRange::default(),
            row_range: None,
            intra4x4: [-1; CACHE_SIZE],
            nnz: [NNZ_UNAVAILABLE; CACHE_SIZE],
            refs: [[REF_UNAVAILABLE; CACHE_SIZE]; 2],
            mvs: [[[0; 2]; CACHE_SIZE]; 2],
            mvds: [[[0; 2]; CACHE_SIZE]; 2],
            direct: [false; CACHE_SIZE],
        }
    }

    pub fn mb_width(&self) -> usize {
        self.mb_width
    }

    pub fn mb_height(&self) -> usize {
        self.mb_height
    }

    pub fn first_mb(&self) -> usize {
        self.first_mb
    }

    pub fn end_mb(&self) -> usize {
        self.end_mb
    }

    /// 下一个待编码宏块的地址, slice 结束时返回 `None`
    pub fn next_mb(&self) -> Option<usize> {
        let next = self.first_mb + self.committed;
        (next < self.end_mb).then_some(next)
    }

    /// 查询已提交的宏块记录; 不在本 slice 或尚未编码时返回 `None`
    pub fn record(&self, mb_xy: usize) -> Option<&MbRecord> {
        if mb_xy < self.first_mb || mb_xy >= self.first_mb + self.committed {
            return None;
        }
        self.records.get(mb_xy - self.first_mb)
    }

    fn neighbour(&self, dx: isize, dy: isize) -> Option<usize> {
        let x = self.mb_x as isize + dx;
        let y = self.mb_y as isize + dy;
        if x < 0 || y < 0 || x >= self.mb_width as isize || y >= self.mb_height as isize {
            return None;
        }
        let xy = y as usize * self.mb_width + x as usize;
        self.record(xy).map(|_| xy)
    }

    /// 左邻宏块记录
    pub fn left(&self) -> Option<&MbRecord> {
        self.neighbour(-1, 0).and_then(|xy| self.record(xy))
    }

    /// 上邻宏块记录
    pub fn top(&self) -> Option<&MbRecord> {
        self.neighbour(0, -1).and_then(|xy| self.record(xy))
    }

    /// 开始编码位于 (mb_x, mb_y) 的宏块: 计算可用性并重建邻居缓存
    pub fn begin_macroblock(&mut self, mb_x: usize, mb_y: usize) {
        self.mb_x = mb_x;
        self.mb_y = mb_y;
        self.mb_xy = mb_y * self.mb_width + mb_x;
        debug_assert_eq!(
            Some(self.mb_xy),
            self.next_mb(),
            "宏块必须按光栅顺序编码"
        );

        let a = self.neighbour(-1, 0);
        let b = self.neighbour(0, -1);
        let c = self.neighbour(1, -1);
        let d = self.neighbour(-1, -1);
        self.avail = (if a.is_some() { NB_LEFT } else { 0 })
            | (if b.is_some() { NB_TOP } else { 0 })
            | (if c.is_some() { NB_TOPRIGHT } else { 0 })
            | (if d.is_some() { NB_TOPLEFT } else { 0 });

        self.update_mv_range();

        self.intra4x4 = [-1; CACHE_SIZE];
        self.nnz = [NNZ_UNAVAILABLE; CACHE_SIZE];
        self.refs = [[REF_UNAVAILABLE; CACHE_SIZE]; 2];
        self.mvs = [[[0; 2]; CACHE_SIZE]; 2];
        self.mvds = [[[0; 2]; CACHE_SIZE]; 2];
        self.direct = [false; CACHE_SIZE];

        for r in 0..16 {
            let idx = scan8(r);
            self.nnz[idx] = 0;
            self.refs[0][idx] = REF_NOT_USED;
            self.refs[1][idx] = REF_NOT_USED;
        }

        if let Some(xy) = a {
            for row in 0..4 {
                self.load_cell(xy, row * 4 + 3, scan8(row * 4) - 1);
            }
        }
        if let Some(xy) = b {
            for col in 0..4 {
                self.load_cell(xy, 12 + col, scan8(col) - CACHE_STRIDE);
            }
        }
        if let Some(xy) = d {
            self.load_cell(xy, 15, scan8(0) - CACHE_STRIDE - 1);
        }
        if let Some(xy) = c {
            self.load_cell(xy, 12, scan8(3) - CACHE_STRIDE + 1);
        }
    }

    fn load_cell(&mut self, mb_xy: usize, raster: usize, idx: usize) {
        let Some(rec) = self.record(mb_xy) else {
            return;
        };
        let mode = if rec.mb_type == MbType::I4x4 {
            rec.intra4x4_modes[raster]
        } else {
            2
        };
        let nnz = rec.nnz[raster];
        let intra = rec.mb_type.is_intra();
        let direct = rec.mb_type.is_direct();
        let b8 = block8_of_raster(raster);
        let mut refs = [REF_NOT_USED; 2];
        let mut mvs = [[0i16; 2]; 2];
        let mut mvds = [[0u16; 2]; 2];
        if !intra {
            for list in 0..2 {
                refs[list] = rec.ref_idx[list][b8];
                mvs[list] = rec.mv[list][raster];
                mvds[list] = rec.mvd[list][raster];
            }
        }
        self.intra4x4[idx] = mode;
        self.nnz[idx] = nnz;
        self.direct[idx] = direct;
        for list in 0..2 {
            self.refs[list][idx] = refs[list];
            self.mvs[list][idx] = mvs[list];
            self.mvds[list][idx] = mvds[list];
        }
    }

    fn update_mv_range(&mut self) {
        // 垂直范围每行计算一次
        let (min_y, max_y) = match self.row_range {
            Some((row, min, max)) if row == self.mb_y => (min[1], max[1]),
            _ => {
                let min_y = -4 * (16 * self.mb_y as i32 + MV_EDGE_MARGIN);
                let max_y = 4 * (16 * (self.mb_height - 1 - self.mb_y) as i32 + MV_EDGE_MARGIN);
                // 帧编码垂直分量限制为 [-512, 511.75]
                let min_y = min_y.max(-2048);
                let max_y = max_y.min(2047);
                self.row_range = Some((self.mb_y, [0, min_y], [0, max_y]));
                (min_y, max_y)
            }
        };
        let min_x = (-4 * (16 * self.mb_x as i32 + MV_EDGE_MARGIN)).max(-8192);
        let max_x = (4 * (16 * (self.mb_width - 1 - self.mb_x) as i32 + MV_EDGE_MARGIN)).min(8191);
        self.mv_range = MvRange {
            min: [min_x, min_y],
            max: [max_x, max_y],
            fpel_min: [(min_x >> 2) + 1, (min_y >> 2) + 1],
            fpel_max: [(max_x >> 2) - 1, (max_y >> 2) - 1],
        };
    }

    /// 提交当前宏块并前进光标
    pub fn commit_macroblock(&mut self, record: MbRecord) {
        debug_assert_eq!(self.records.len(), self.committed);
        self.records.push(record);
        self.committed += 1;
    }

    /// 取出全部记录 (slice 结束后汇总到帧)
    pub fn into_records(self) -> Vec<MbRecord> {
        self.records
    }

    // ========================================================
    // CABAC 上下文增量
    // ========================================================

    /// mb_skip_flag: 邻居可用且不是跳过宏块
    pub fn skip_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| usize::from(r.is_some_and(|r| !r.mb_type.is_skip()));
        cond(self.left()) + cond(self.top())
    }

    /// I slice mb_type 首 bin: 邻居可用且不是 I_NxN
    pub fn mb_type_i_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| usize::from(r.is_some_and(|r| r.mb_type != MbType::I4x4));
        cond(self.left()) + cond(self.top())
    }

    /// B slice mb_type 首 bin: 邻居可用且不是 B_Skip/B_Direct_16x16
    pub fn mb_type_b_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| usize::from(r.is_some_and(|r| !r.mb_type.is_direct()));
        cond(self.left()) + cond(self.top())
    }

    /// transform_size_8x8_flag
    pub fn transform_8x8_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| usize::from(r.is_some_and(|r| r.transform_8x8));
        cond(self.left()) + cond(self.top())
    }

    /// intra_chroma_pred_mode
    pub fn chroma_pred_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| {
            usize::from(r.is_some_and(|r| r.mb_type.is_intra() && r.chroma_pred_mode != 0))
        };
        cond(self.left()) + cond(self.top())
    }

    /// 左、上邻居的 CBP (不可用为 `None`, 跳过宏块为 0)
    pub fn neighbour_cbp(&self) -> (Option<u8>, Option<u8>) {
        (self.left().map(|r| r.cbp), self.top().map(|r| r.cbp))
    }

    /// 亮度 4x4/8x8 块的 coded_block_flag 上下文增量 (类别 1/2)
    pub fn luma_cbf_ctx_inc(&self, raster: usize, intra: bool) -> usize {
        let idx = scan8(raster);
        let cond = |v: u8| {
            if v == NNZ_UNAVAILABLE {
                usize::from(intra)
            } else {
                usize::from(v != 0)
            }
        };
        cond(self.nnz[idx - 1]) + 2 * cond(self.nnz[idx - CACHE_STRIDE])
    }

    /// Intra16x16 亮度 DC 的 coded_block_flag 上下文增量
    pub fn luma_dc_cbf_ctx_inc(&self) -> usize {
        let cond = |r: Option<&MbRecord>| match r {
            None => 1,
            Some(r) => usize::from(r.mb_type == MbType::I16x16 && r.dc_cbf & 1 != 0),
        };
        cond(self.left()) + 2 * cond(self.top())
    }

    /// 色度 DC 的 coded_block_flag 上下文增量, `plane` 为 0 (Cb) 或 1 (Cr)
    pub fn chroma_dc_cbf_ctx_inc(&self, plane: usize, intra: bool) -> usize {
        let bit = 2 << plane;
        let cond = |r: Option<&MbRecord>| match r {
            None => usize::from(intra),
            Some(r) => usize::from(r.dc_cbf & bit != 0),
        };
        cond(self.left()) + 2 * cond(self.top())
    }

    /// 色度 AC 块 (cx, cy) 的 coded_block_flag 上下文增量
    ///
    /// `current` 为当前宏块该平面已编码的 4 个 AC 块非零个数.
    pub fn chroma_ac_cbf_ctx_inc(
        &self,
        plane: usize,
        cx: usize,
        cy: usize,
        current: &[u8; 4],
        intra: bool,
    ) -> usize {
        let base = 16 + plane * 4;
        let cond_a = if cx > 0 {
            usize::from(current[cy * 2 + cx - 1] != 0)
        } else {
            self.left()
                .map_or(usize::from(intra), |r| usize::from(r.nnz[base + cy * 2 + 1] != 0))
        };
        let cond_b = if cy > 0 {
            usize::from(current[cx] != 0)
        } else {
            self.top()
                .map_or(usize::from(intra), |r| usize::from(r.nnz[base + 2 + cx] != 0))
        };
        cond_a + 2 * cond_b
    }

    /// ref_idx 上下文增量: 邻居参考索引大于 0 且不是直接预测
    pub fn ref_ctx_inc(&self, list: usize, raster: usize) -> usize {
        let idx = scan8(raster);
        let cond = |i: usize| usize::from(self.refs[list][i] > 0 && !self.direct[i]);
        cond(idx - 1) + 2 * cond(idx - CACHE_STRIDE)
    }

    /// mvd 上下文用的左、上邻居 |mvd| 之和
    pub fn mvd_abs_sum(&self, list: usize, raster: usize, comp: usize) -> u32 {
        let idx = scan8(raster);
        u32::from(self.mvds[list][idx - 1][comp]) + u32::from(self.mvds[list][idx - CACHE_STRIDE][comp])
    }

    // ========================================================
    // 帧内预测模式
    // ========================================================

    /// 4x4 块的预测帧内模式
    pub fn predicted_intra4x4_mode(&self, raster: usize) -> i8 {
        let idx = scan8(raster);
        let a = self.intra4x4[idx - 1];
        let b = self.intra4x4[idx - CACHE_STRIDE];
        if a < 0 || b < 0 { 2 } else { a.min(b) }
    }

    /// 4x4 块的右上方样本是否可用
    pub fn intra4x4_topright_available(&self, raster: usize) -> bool {
        let (bx, by) = (raster & 3, raster >> 2);
        if by == 0 {
            return if bx == 3 {
                self.avail & NB_TOPRIGHT != 0
            } else {
                self.avail & NB_TOP != 0
            };
        }
        if bx == 3 {
            return false;
        }
        // 右上块必须已按 Z 字形顺序编码
        RASTER_BLOCK[(by - 1) * 4 + bx + 1] < RASTER_BLOCK[raster]
    }

    // ========================================================
    // 运动矢量预测
    // ========================================================

    fn neighbour_c(&self, list: usize, idx: usize, width: usize) -> usize {
        let c = idx - CACHE_STRIDE + width;
        if self.refs[list][c] == REF_UNAVAILABLE {
            idx - CACHE_STRIDE - 1
        } else {
            c
        }
    }

    /// 中值运动矢量预测
    ///
    /// `raster` 为分区左上角 4x4 块, `width` 为分区宽度 (以 4x4 块计).
    pub fn predict_mv(&self, list: usize, ref_idx: i8, raster: usize, width: usize) -> [i16; 2] {
        let idx = scan8(raster);
        let a = idx - 1;
        let b = idx - CACHE_STRIDE;
        let c = self.neighbour_c(list, idx, width);
        let refs = &self.refs[list];
        let mvs = &self.mvs[list];

        let matches = usize::from(refs[a] == ref_idx)
            + usize::from(refs[b] == ref_idx)
            + usize::from(refs[c] == ref_idx);
        if matches == 1 {
            if refs[a] == ref_idx {
                return mvs[a];
            }
            if refs[b] == ref_idx {
                return mvs[b];
            }
            return mvs[c];
        }
        if matches == 0
            && refs[b] == REF_UNAVAILABLE
            && refs[c] == REF_UNAVAILABLE
            && refs[a] != REF_UNAVAILABLE
        {
            return mvs[a];
        }
        [
            median(mvs[a][0], mvs[b][0], mvs[c][0]),
            median(mvs[a][1], mvs[b][1], mvs[c][1]),
        ]
    }

    /// 16x8 分区的方向性预测, `part` 为 0 (上) 或 1 (下)
    pub fn predict_mv_16x8(&self, list: usize, ref_idx: i8, part: usize) -> [i16; 2] {
        let raster = part * 8;
        let idx = scan8(raster);
        let n = if part == 0 { idx - CACHE_STRIDE } else { idx - 1 };
        if self.refs[list][n] == ref_idx {
            return self.mvs[list][n];
        }
        self.predict_mv(list, ref_idx, raster, 4)
    }

    /// 8x16 分区的方向性预测, `part` 为 0 (左) 或 1 (右)
    pub fn predict_mv_8x16(&self, list: usize, ref_idx: i8, part: usize) -> [i16; 2] {
        let raster = part * 2;
        let idx = scan8(raster);
        let n = if part == 0 {
            idx - 1
        } else {
            self.neighbour_c(list, idx, 2)
        };
        if self.refs[list][n] == ref_idx {
            return self.mvs[list][n];
        }
        self.predict_mv(list, ref_idx, raster, 2)
    }

    /// P_Skip 的运动矢量
    pub fn predict_mv_pskip(&self) -> [i16; 2] {
        let idx = scan8(0);
        let a = idx - 1;
        let b = idx - CACHE_STRIDE;
        let refs = &self.refs[0];
        let mvs = &self.mvs[0];
        if refs[a] == REF_UNAVAILABLE || refs[b] == REF_UNAVAILABLE {
            return [0, 0];
        }
        if (refs[a] == 0 && mvs[a] == [0, 0]) || (refs[b] == 0 && mvs[b] == [0, 0]) {
            return [0, 0];
        }
        self.predict_mv(0, 0, 0, 4)
    }

    /// 把分区运动信息写入缓存, 矩形以 4x4 块为单位
    #[allow(clippy::too_many_arguments)]
    pub fn fill_motion(
        &mut self,
        list: usize,
        raster: usize,
        width: usize,
        height: usize,
        ref_idx: i8,
        mv: [i16; 2],
        mvd: [u16; 2],
    ) {
        let (bx, by) = (raster & 3, raster >> 2);
        for y in by..by + height {
            for x in bx..bx + width {
                let idx = scan8(y * 4 + x);
                self.refs[list][idx] = ref_idx;
                self.mvs[list][idx] = mv;
                self.mvds[list][idx] = mvd;
            }
        }
    }

    /// 把当前宏块标记为直接预测 (影响后续 ref_idx 上下文)
    pub fn mark_direct(&mut self) {
        for r in 0..16 {
            self.direct[scan8(r)] = true;
        }
    }
}

//! Slice 编码.
//!
//! 一个 slice 覆盖连续的整行宏块, 由一个任务独立完成: 模式决策、残差变换量化、
//! 重建写回本 slice 的平面条带, 以及 CABAC 语法写出. 任务之间只共享只读的
//! [`FrameContext`], 因此可以并行执行.
//!
//! 每个宏块分两步:
//! 1. 决策: 评估候选模式 (跳过、帧间分区、直接预测、Intra16x16、Intra4x4),
//!    对选中的模式做变换量化与重建, 得到 [`CodedMb`];
//! 2. 写出: 按标准语法顺序写 mb_skip_flag、mb_type、预测信息、CBP、
//!    QP 差值与残差, 同时更新邻居缓存.

use tao264_core::{TaoError, TaoResult};

use super::analyse::{Analyser, CostFunction, I4_MB_OVERHEAD_BITS, MotionSearch, mv_cost, ref_cost};
use super::cabac::{CabacEncoder, ContextBank};
use super::direct::{BiPredTables, TemporalDirect};
use super::frames::{Frame, Plane, PlaneBand, RefLists, YuvPlanes};
use super::macroblock::{
    MacroblockContext, MbRecord, MbType, NB_LEFT, NB_TOP, NB_TOPLEFT, REF_NOT_USED, scan8,
};
use super::mc::{avg_bipred, mc_chroma, mc_luma, weighted_bipred};
use super::nal::{NalPriority, NalUnit, NalUnitType};
use super::parameter_sets::{Pps, Sps};
use super::predict::{BlockEdges, Edges4, I4_DC, I16_DC, predict_16x16, predict_chroma};
use super::slice_header::{SliceHeader, SliceType};
use super::stats::SliceStats;
use super::syntax::{
    CAT_CHROMA_AC, CAT_CHROMA_DC, CAT_LUMA_4X4, CAT_LUMA_8X8, CAT_LUMA_AC, CAT_LUMA_DC,
    I16x16Type, write_cbp, write_chroma_pred_mode, write_end_of_slice, write_intra_mb_type,
    write_intra4x4_mode, write_mb_skip, write_mb_type_b, write_mb_type_p, write_mvd, write_qp_delta,
    write_ref_idx, write_residual_block, write_sub_mb_type_p8x8, write_transform_8x8_flag,
};
use super::tables::{BLOCK_RASTER, QP_MAX, ZIGZAG_4X4, ZIGZAG_8X8, block8_of_raster, chroma_qp};
use super::transform::{
    BlockKind, QuantMode, QuantizedBlock, dequant4x4, dequantize_inverse_transform, fdct4x4,
    idct4x4, quant4x4, transform_quantize,
};

// ============================================================
// 帧级输入与 slice 输出
// ============================================================

/// 一帧内所有 slice 共享的只读上下文
pub struct FrameContext<'a> {
    pub sps: &'a Sps,
    pub pps: &'a Pps,
    pub nal_type: NalUnitType,
    pub priority: NalPriority,
    /// 当前帧源图像
    pub source: &'a YuvPlanes,
    /// 两个参考列表各项的重建图像, 与 `lists` 一一对应
    pub refs: [Vec<&'a YuvPlanes>; 2],
    pub lists: &'a RefLists,
    /// B 帧的 col 图像 (list1[0])
    pub col: Option<&'a Frame>,
    /// B 帧的缩放因子与隐式权重
    pub bipred: Option<&'a BiPredTables>,
    /// 每个宏块的计划 QP
    pub qp_plan: &'a [u8],
    pub cost: &'a dyn CostFunction,
    pub search: &'a dyn MotionSearch,
    pub me_range: u32,
    pub lossless: bool,
}

/// 一个 slice 任务
#[derive(Debug, Clone)]
pub struct SliceJob {
    pub header: SliceHeader,
    /// 结束宏块地址 (不含)
    pub end_mb: usize,
}

/// 一个 slice 的编码结果
#[derive(Debug, Clone)]
pub struct SliceOutput {
    pub nal: NalUnit,
    pub records: Vec<MbRecord>,
    pub stats: SliceStats,
}

/// 编码一个 slice, 重建样本写入 `band`
///
/// `band` 必须恰好覆盖 slice 的宏块行.
pub fn encode_slice(f: &FrameContext<'_>, job: SliceJob, band: [PlaneBand<'_>; 3]) -> TaoResult<SliceOutput> {
    let mb_width = f.sps.mb_width as usize;
    let mb_height = f.sps.mb_height as usize;
    let first_mb = job.header.first_mb as usize;
    if first_mb % mb_width != 0
        || first_mb >= job.end_mb
        || job.end_mb > mb_width * mb_height
        || band[0].y_start != first_mb / mb_width * 16
    {
        return Err(TaoError::Internal(format!(
            "H264Enc: slice 范围 [{}, {}) 与条带起始行 {} 不匹配",
            first_mb, job.end_mb, band[0].y_start
        )));
    }

    let slice_type = job.header.slice_type;
    let slice_qp = job.header.slice_qp(f.pps);
    let mut bw = NalUnit::begin(f.nal_type, f.priority, (job.end_mb - first_mb) * 48);
    job.header.write(&mut bw, f.sps, f.pps, f.priority as u8);
    bw.align_with_ones();
    let bank = ContextBank::new(slice_type.is_intra(), job.header.cabac_init_idc, slice_qp);

    let direct = match (slice_type, f.col, f.bipred) {
        (SliceType::B, Some(col), Some(tables)) => Some(TemporalDirect::new(col, &f.lists.lists[0], tables)),
        _ => None,
    };

    let mut enc = SliceEncoder {
        f,
        band,
        ctx: MacroblockContext::new(mb_width, mb_height, first_mb, job.end_mb),
        cabac: CabacEncoder::new(bw, bank),
        slice_type,
        num_active: job.header.num_ref_idx_active,
        direct,
        qp_pred: slice_qp,
        prev_qp_delta_nonzero: false,
        stats: SliceStats::default(),
    };
    while let Some(mb_xy) = enc.ctx.next_mb() {
        enc.encode_macroblock(mb_xy % mb_width, mb_xy / mb_width);
        write_end_of_slice(&mut enc.cabac, mb_xy + 1 == job.end_mb);
    }

    let SliceEncoder { cabac, ctx, stats, .. } = enc;
    Ok(SliceOutput {
        nal: NalUnit::from_writer(f.nal_type, f.priority, cabac.finish()),
        records: ctx.into_records(),
        stats,
    })
}

// ============================================================
// 宏块数据
// ============================================================

/// 分区: 左上角 4x4 光栅块与宽高 (以 4x4 块计)
#[derive(Debug, Clone, Copy)]
struct Partition {
    raster: usize,
    w: usize,
    h: usize,
}

const PART_16X16: [Partition; 1] = [Partition { raster: 0, w: 4, h: 4 }];
const PART_16X8: [Partition; 2] = [Partition { raster: 0, w: 4, h: 2 }, Partition { raster: 8, w: 4, h: 2 }];
const PART_8X16: [Partition; 2] = [Partition { raster: 0, w: 2, h: 4 }, Partition { raster: 2, w: 2, h: 4 }];
const PART_8X8: [Partition; 4] = [
    Partition { raster: 0, w: 2, h: 2 },
    Partition { raster: 2, w: 2, h: 2 },
    Partition { raster: 8, w: 2, h: 2 },
    Partition { raster: 10, w: 2, h: 2 },
];

fn partitions(mb_type: MbType) -> &'static [Partition] {
    match mb_type {
        MbType::P16x8 => &PART_16X8,
        MbType::P8x16 => &PART_8X16,
        MbType::P8x8 => &PART_8X8,
        _ => &PART_16X16,
    }
}

/// mb_type (含子块类型) 的估计比特数
fn p_type_bits(mb_type: MbType) -> u32 {
    match mb_type {
        MbType::P16x16 => 1,
        MbType::P16x8 | MbType::P8x16 => 3,
        _ => 7,
    }
}

/// 宏块的运动信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MotionField {
    /// [列表][8x8 块]
    ref_idx: [[i8; 4]; 2],
    /// [列表][4x4 光栅块]
    mv: [[[i16; 2]; 16]; 2],
}

impl Default for MotionField {
    fn default() -> Self {
        Self {
            ref_idx: [[REF_NOT_USED; 4]; 2],
            mv: [[[0; 2]; 16]; 2],
        }
    }
}

impl MotionField {
    fn set(&mut self, list: usize, p: Partition, ref_idx: i8, mv: [i16; 2]) {
        let (bx, by) = (p.raster & 3, p.raster >> 2);
        for y in by..by + p.h {
            for x in bx..bx + p.w {
                self.mv[list][y * 4 + x] = mv;
                self.ref_idx[list][block8_of_raster(y * 4 + x)] = ref_idx;
            }
        }
    }

    fn single(list: usize, ref_idx: i8, mv: [i16; 2]) -> Self {
        let mut m = Self::default();
        m.set(list, PART_16X16[0], ref_idx, mv);
        m
    }
}

/// 亮度残差, 各块电平为光栅顺序
#[derive(Debug, Clone)]
enum LumaCoeffs {
    Blocks4x4([QuantizedBlock; 16]),
    Blocks8x8([QuantizedBlock; 4]),
    /// DC 矩阵按块的空间位置排列, AC 块位置 0 恒为 0
    Intra16 {
        dc: QuantizedBlock,
        ac: [QuantizedBlock; 16],
    },
}

/// 两个色度平面的残差
#[derive(Debug, Clone)]
struct ChromaCoeffs {
    dc: [QuantizedBlock; 2],
    ac: [[QuantizedBlock; 4]; 2],
}

/// 完成决策与重建、等待写出的宏块
#[derive(Debug, Clone)]
struct CodedMb {
    mb_type: MbType,
    /// 选中模式的代价
    cost: u32,
    motion: MotionField,
    i16_mode: u8,
    i4_modes: [i8; 16],
    chroma_mode: u8,
    transform_8x8: bool,
    luma: LumaCoeffs,
    chroma: ChromaCoeffs,
    cbp: u8,
    recon_y: [u8; 256],
    recon_c: [[u8; 64]; 2],
}

/// 宏块源样本
struct MbSource {
    y: [u8; 256],
    c: [[u8; 64]; 2],
}

/// Intra4x4 试编码结果 (已经顺序重建)
#[derive(Debug, Clone)]
struct I4Trial {
    modes: [i8; 16],
    blocks: [QuantizedBlock; 16],
    recon: [u8; 256],
    cost: u32,
}

#[derive(Debug, Clone)]
enum IntraCandidate {
    I16 { mode: u8, edges: BlockEdges<16>, cost: u32 },
    I4(Box<I4Trial>),
}

impl IntraCandidate {
    fn cost(&self) -> u32 {
        match self {
            Self::I16 { cost, .. } => *cost,
            Self::I4(t) => t.cost,
        }
    }
}

/// 帧间候选
#[derive(Debug, Clone, Copy)]
struct InterCandidate {
    mb_type: MbType,
    motion: MotionField,
    cost: u32,
}

// ============================================================
// 残差编码与重建
// ============================================================

fn empty_block(kind: BlockKind) -> QuantizedBlock {
    QuantizedBlock {
        kind,
        levels: [0; 64],
        nnz: 0,
    }
}

fn load_block<const N: usize>(plane: &Plane, x: usize, y: usize, size: usize) -> [u8; N] {
    let mut out = [0u8; N];
    for row in 0..size {
        let at = plane.index(x, y + row);
        out[row * size..(row + 1) * size].copy_from_slice(&plane.data[at..at + size]);
    }
    out
}

/// (x, y) 处 `size x size` 块的残差, 光栅顺序
fn residual<const N: usize>(src: &[u8], pred: &[u8], stride: usize, x: usize, y: usize, size: usize) -> [i32; N] {
    let mut out = [0i32; N];
    for j in 0..size {
        for i in 0..size {
            let at = (y + j) * stride + x + i;
            out[j * size + i] = i32::from(src[at]) - i32::from(pred[at]);
        }
    }
    out
}

/// 预测加残差写入重建块
fn reconstruct(pred: &[u8], res: &[i32], stride: usize, x: usize, y: usize, size: usize, out: &mut [u8]) {
    for j in 0..size {
        for i in 0..size {
            let at = (y + j) * stride + x + i;
            out[at] = (i32::from(pred[at]) + res[j * size + i]).clamp(0, 255) as u8;
        }
    }
}

fn zigzag16(levels: &[i32; 64]) -> [i32; 16] {
    ZIGZAG_4X4.map(|i| levels[i])
}

fn zigzag64(levels: &[i32; 64]) -> [i32; 64] {
    ZIGZAG_8X8.map(|i| levels[i])
}

/// 帧间或 Intra4x4 亮度: 4x4 或 8x8 变换
fn code_luma_blocks(
    src: &[u8; 256],
    pred: &[u8; 256],
    qp: i32,
    transform_8x8: bool,
    mode: QuantMode,
) -> (LumaCoeffs, [u8; 256]) {
    let mut recon = [0u8; 256];
    if transform_8x8 {
        let mut blocks = std::array::from_fn(|_| empty_block(BlockKind::Luma8x8));
        for (b8, block) in blocks.iter_mut().enumerate() {
            let (x, y) = ((b8 & 1) * 8, (b8 >> 1) * 8);
            let res: [i32; 64] = residual(src, pred, 16, x, y, 8);
            *block = transform_quantize(&res, qp, BlockKind::Luma8x8, mode);
            let rec = dequantize_inverse_transform(block, qp, mode.lossless);
            reconstruct(pred, &rec, 16, x, y, 8, &mut recon);
        }
        return (LumaCoeffs::Blocks8x8(blocks), recon);
    }
    let mut blocks = std::array::from_fn(|_| empty_block(BlockKind::Luma4x4));
    for (r, block) in blocks.iter_mut().enumerate() {
        let (x, y) = ((r & 3) * 4, (r >> 2) * 4);
        let res: [i32; 16] = residual(src, pred, 16, x, y, 4);
        *block = transform_quantize(&res, qp, BlockKind::Luma4x4, mode);
        let rec = dequantize_inverse_transform(block, qp, mode.lossless);
        reconstruct(pred, &rec, 16, x, y, 4, &mut recon);
    }
    (LumaCoeffs::Blocks4x4(blocks), recon)
}

/// 一个 4x4 块 (Intra4x4 逐块重建用)
fn code_block4x4(src: &[u8; 16], pred: &[u8; 16], qp: i32, mode: QuantMode) -> (QuantizedBlock, [u8; 16]) {
    let res: [i32; 16] = residual(src, pred, 4, 0, 0, 4);
    let block = transform_quantize(&res, qp, BlockKind::Luma4x4, mode);
    let rec = dequantize_inverse_transform(&block, qp, mode.lossless);
    let mut out = [0u8; 16];
    reconstruct(pred, &rec, 4, 0, 0, 4, &mut out);
    (block, out)
}

/// DC 分离编码: 每个 4x4 子块的 DC 汇成矩阵单独变换, AC 从位置 1 起量化
///
/// 返回 (DC 输入矩阵, AC 块). 无损模式下 DC 为残差首样本, AC 为其余残差.
fn split_dc_ac<const B: usize>(
    src: &[u8],
    pred: &[u8],
    stride: usize,
    qp: i32,
    mode: QuantMode,
) -> ([i32; B], [QuantizedBlock; B]) {
    let per_row = stride / 4;
    let mut dc = [0i32; B];
    let mut ac = std::array::from_fn(|_| empty_block(BlockKind::Luma4x4));
    for (b, block) in ac.iter_mut().enumerate() {
        let (x, y) = ((b % per_row) * 4, (b / per_row) * 4);
        let res: [i32; 16] = residual(src, pred, stride, x, y, 4);
        let mut coeffs = if mode.lossless { res } else { fdct4x4(&res) };
        dc[b] = coeffs[0];
        let nnz = if mode.lossless {
            coeffs[1..].iter().filter(|&&c| c != 0).count() as u8
        } else {
            quant4x4(&mut coeffs, qp, mode.intra, 1)
        };
        coeffs[0] = 0;
        block.levels[..16].copy_from_slice(&coeffs);
        block.nnz = nnz;
    }
    (dc, ac)
}

/// 由反量化后的 DC 与 AC 电平重建 DC 分离的块
fn reconstruct_dc_ac(
    dc: &[i32],
    ac: &[QuantizedBlock],
    pred: &[u8],
    stride: usize,
    qp: i32,
    lossless: bool,
    out: &mut [u8],
) {
    let per_row = stride / 4;
    for (b, block) in ac.iter().enumerate() {
        let (x, y) = ((b % per_row) * 4, (b / per_row) * 4);
        let mut c = [0i32; 16];
        c.copy_from_slice(&block.levels[..16]);
        let res = if lossless {
            c[0] = dc[b];
            c
        } else {
            dequant4x4(&mut c, qp, 1);
            c[0] = dc[b];
            idct4x4(&c)
        };
        reconstruct(pred, &res, stride, x, y, 4, out);
    }
}

/// Intra16x16 亮度
fn code_luma_i16(src: &[u8; 256], pred: &[u8; 256], qp: i32, lossless: bool) -> (LumaCoeffs, [u8; 256]) {
    let mode = QuantMode { intra: true, lossless };
    let (dc_in, ac) = split_dc_ac::<16>(src, pred, 16, qp, mode);
    let dc = transform_quantize(&dc_in, qp, BlockKind::LumaDc, mode);
    let dc_rec = dequantize_inverse_transform(&dc, qp, lossless);
    let mut recon = [0u8; 256];
    reconstruct_dc_ac(&dc_rec, &ac, pred, 16, qp, lossless, &mut recon);
    (LumaCoeffs::Intra16 { dc, ac }, recon)
}

/// 两个色度平面
fn code_chroma(
    src: [&[u8; 64]; 2],
    pred: [&[u8; 64]; 2],
    qpc: i32,
    mode: QuantMode,
) -> (ChromaCoeffs, [[u8; 64]; 2]) {
    let mut recon = [[0u8; 64]; 2];
    let mut dcs = std::array::from_fn(|_| empty_block(BlockKind::ChromaDc));
    let mut acs: [[QuantizedBlock; 4]; 2] =
        std::array::from_fn(|_| std::array::from_fn(|_| empty_block(BlockKind::Luma4x4)));
    for c in 0..2 {
        let (dc_in, ac) = split_dc_ac::<4>(src[c], pred[c], 8, qpc, mode);
        let dc = transform_quantize(&dc_in, qpc, BlockKind::ChromaDc, mode);
        let dc_rec = dequantize_inverse_transform(&dc, qpc, mode.lossless);
        reconstruct_dc_ac(&dc_rec, &ac, pred[c], 8, qpc, mode.lossless, &mut recon[c]);
        dcs[c] = dc;
        acs[c] = ac;
    }
    (ChromaCoeffs { dc: dcs, ac: acs }, recon)
}

fn luma_cbp(luma: &LumaCoeffs) -> u8 {
    match luma {
        LumaCoeffs::Blocks4x4(blocks) => blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.nnz > 0)
            .fold(0, |cbp, (r, _)| cbp | 1 << block8_of_raster(r)),
        LumaCoeffs::Blocks8x8(blocks) => blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.nnz > 0)
            .fold(0, |cbp, (b8, _)| cbp | 1 << b8),
        LumaCoeffs::Intra16 { ac, .. } => {
            if ac.iter().any(|b| b.nnz > 0) {
                15
            } else {
                0
            }
        }
    }
}

fn chroma_cbp(chroma: &ChromaCoeffs) -> u8 {
    if chroma.ac.iter().flatten().any(|b| b.nnz > 0) {
        2
    } else if chroma.dc.iter().any(|b| b.nnz > 0) {
        1
    } else {
        0
    }
}

/// 清除当前宏块的运动缓存 (分析阶段的试探值)
fn reset_motion_cache(ctx: &mut MacroblockContext) {
    for list in 0..2 {
        ctx.fill_motion(list, 0, 4, 4, REF_NOT_USED, [0, 0], [0, 0]);
    }
}

/// 分区的运动矢量预测
fn predict_partition(
    ctx: &MacroblockContext,
    mb_type: MbType,
    list: usize,
    ref_idx: i8,
    index: usize,
    p: Partition,
) -> [i16; 2] {
    match mb_type {
        MbType::P16x8 => ctx.predict_mv_16x8(list, ref_idx, index),
        MbType::P8x16 => ctx.predict_mv_8x16(list, ref_idx, index),
        _ => ctx.predict_mv(list, ref_idx, p.raster, p.w),
    }
}

// ============================================================
// Slice 编码器
// ============================================================

struct SliceEncoder<'f, 'a, 'b> {
    f: &'f FrameContext<'a>,
    band: [PlaneBand<'b>; 3],
    ctx: MacroblockContext,
    cabac: CabacEncoder,
    slice_type: SliceType,
    num_active: [u32; 2],
    direct: Option<TemporalDirect<'a>>,
    qp_pred: i32,
    /// 上一个宏块是否写出了非零的 mb_qp_delta
    prev_qp_delta_nonzero: bool,
    stats: SliceStats,
}

impl<'f, 'a, 'b> SliceEncoder<'f, 'a, 'b> {
    fn origin(&self) -> (usize, usize) {
        (self.ctx.mb_x * 16, self.ctx.mb_y * 16)
    }

    fn encode_macroblock(&mut self, mb_x: usize, mb_y: usize) {
        self.ctx.begin_macroblock(mb_x, mb_y);
        let f = self.f;
        let planned = f
            .qp_plan
            .get(self.ctx.mb_xy)
            .map_or(self.qp_pred, |&q| i32::from(q));
        let qp = planned
            .clamp(self.qp_pred - 26, self.qp_pred + 25)
            .clamp(0, QP_MAX);
        let analyser = Analyser::new(f.cost, f.search, qp as u8, f.me_range, f.lossless);

        let (x0, y0) = self.origin();
        let src = MbSource {
            y: load_block(&f.source.planes[0], x0, y0, 16),
            c: [
                load_block(&f.source.planes[1], x0 / 2, y0 / 2, 8),
                load_block(&f.source.planes[2], x0 / 2, y0 / 2, 8),
            ],
        };

        let coded = match self.slice_type {
            SliceType::I => {
                let intra = self.intra_candidate(&analyser, &src, qp);
                self.code_intra(&analyser, &src, qp, intra)
            }
            SliceType::P => self.decide_p(&analyser, &src, qp),
            SliceType::B => self.decide_b(&analyser, &src, qp),
        };

        let record = self.write_macroblock(&coded, qp);

        self.band[0].put_block(x0, y0, 16, 16, &coded.recon_y);
        self.band[1].put_block(x0 / 2, y0 / 2, 8, 8, &coded.recon_c[0]);
        self.band[2].put_block(x0 / 2, y0 / 2, 8, 8, &coded.recon_c[1]);

        self.stats.mb_types[record.mb_type.index()] += 1;
        if record.mb_type.is_intra() {
            self.stats.intra_cost += u64::from(coded.cost);
        } else {
            self.stats.inter_cost += u64::from(coded.cost);
        }
        self.stats.qp_sum += u64::from(record.qp);
        self.stats.mb_count += 1;
        self.ctx.commit_macroblock(record);
    }

    // --------------------------------------------------------
    // 帧内
    // --------------------------------------------------------

    fn luma_edges(&self) -> BlockEdges<16> {
        let (x0, y0) = self.origin();
        let band = &self.band[0];
        let (ox, oy) = band.origin(x0, y0);
        BlockEdges::gather(&band.data[..], band.stride, ox, oy, self.ctx.avail)
    }

    fn chroma_edges(&self, plane: usize) -> BlockEdges<8> {
        let (x0, y0) = self.origin();
        let band = &self.band[plane];
        let (ox, oy) = band.origin(x0 / 2, y0 / 2);
        BlockEdges::gather(&band.data[..], band.stride, ox, oy, self.ctx.avail)
    }

    /// Intra4x4 试编码: 按解码顺序逐块选择模式并重建到条带
    fn trial_i4(&mut self, an: &Analyser<'_>, src: &[u8; 256], qp: i32) -> I4Trial {
        let (x0, y0) = self.origin();
        let avail = self.ctx.avail;
        let mode = QuantMode {
            intra: true,
            lossless: self.f.lossless,
        };
        let mut trial = I4Trial {
            modes: [I4_DC; 16],
            blocks: std::array::from_fn(|_| empty_block(BlockKind::Luma4x4)),
            recon: [0; 256],
            cost: an.lambda() * I4_MB_OVERHEAD_BITS,
        };
        for &raster in &BLOCK_RASTER {
            let (bx, by) = (raster & 3, raster >> 2);
            let (px, py) = (x0 + bx * 4, y0 + by * 4);
            let has_top = by > 0 || avail & NB_TOP != 0;
            let has_left = bx > 0 || avail & NB_LEFT != 0;
            let has_top_left = match (bx > 0, by > 0) {
                (true, true) => true,
                (false, true) => avail & NB_LEFT != 0,
                (true, false) => avail & NB_TOP != 0,
                (false, false) => avail & NB_TOPLEFT != 0,
            };
            let has_top_right = self.ctx.intra4x4_topright_available(raster);
            let edges = {
                let band = &self.band[0];
                let (ox, oy) = band.origin(px, py);
                Edges4::gather(&band.data[..], band.stride, ox, oy, has_top, has_left, has_top_left, has_top_right)
            };
            let src4: [u8; 16] = std::array::from_fn(|i| src[(by * 4 + i / 4) * 16 + bx * 4 + i % 4]);
            let predicted = self.ctx.predicted_intra4x4_mode(raster);
            let (m, cost, pred) = an.best_i4(&edges, &src4, predicted);
            self.ctx.intra4x4[scan8(raster)] = m;

            let (block, rec) = code_block4x4(&src4, &pred, qp, mode);
            self.band[0].put_block(px, py, 4, 4, &rec);
            for (row, chunk) in rec.chunks_exact(4).enumerate() {
                let at = (by * 4 + row) * 16 + bx * 4;
                trial.recon[at..at + 4].copy_from_slice(chunk);
            }
            trial.modes[raster] = m;
            trial.blocks[raster] = block;
            trial.cost = trial.cost.saturating_add(cost);
        }
        trial
    }

    fn intra_candidate(&mut self, an: &Analyser<'_>, src: &MbSource, qp: i32) -> IntraCandidate {
        let edges = self.luma_edges();
        let (mode, cost) = an.best_i16(&edges, &src.y);
        let trial = self.trial_i4(an, &src.y, qp);
        if trial.cost < cost {
            IntraCandidate::I4(Box::new(trial))
        } else {
            IntraCandidate::I16 { mode, edges, cost }
        }
    }

    fn code_intra(&mut self, an: &Analyser<'_>, src: &MbSource, qp: i32, cand: IntraCandidate) -> CodedMb {
        let lossless = self.f.lossless;
        let cost = cand.cost();
        let (mb_type, luma, recon_y, i16_mode, i4_modes) = match cand {
            IntraCandidate::I16 { mode, edges, .. } => {
                let mut pred = [0u8; 256];
                predict_16x16(&edges, mode, &mut pred);
                let (luma, recon) = code_luma_i16(&src.y, &pred, qp, lossless);
                (MbType::I16x16, luma, recon, mode, [I4_DC; 16])
            }
            IntraCandidate::I4(t) => {
                let t = *t;
                (MbType::I4x4, LumaCoeffs::Blocks4x4(t.blocks), t.recon, I16_DC, t.modes)
            }
        };

        let edges = [self.chroma_edges(1), self.chroma_edges(2)];
        let chroma_mode = an.best_chroma([&edges[0], &edges[1]], [&src.c[0], &src.c[1]]);
        let mut pred_c = [[0u8; 64]; 2];
        for c in 0..2 {
            predict_chroma(&edges[c], chroma_mode, &mut pred_c[c]);
        }
        let qpc = chroma_qp(qp, self.f.pps.chroma_qp_index_offset);
        let (chroma, recon_c) = code_chroma(
            [&src.c[0], &src.c[1]],
            [&pred_c[0], &pred_c[1]],
            qpc,
            QuantMode { intra: true, lossless },
        );
        let cbp = luma_cbp(&luma) | chroma_cbp(&chroma) << 4;
        CodedMb {
            mb_type,
            cost,
            motion: MotionField::default(),
            i16_mode,
            i4_modes,
            chroma_mode,
            transform_8x8: false,
            luma,
            chroma,
            cbp,
            recon_y,
            recon_c,
        }
    }

    // --------------------------------------------------------
    // 帧间
    // --------------------------------------------------------

    /// 按运动信息逐 8x8 块做运动补偿
    fn predict_inter(&self, motion: &MotionField) -> ([u8; 256], [[u8; 64]; 2]) {
        let f = self.f;
        let (x0, y0) = self.origin();
        let mut pred_y = [128u8; 256];
        let mut pred_c = [[128u8; 64]; 2];
        for b8 in 0..4 {
            let (bx, by) = ((b8 & 1) * 8, (b8 >> 1) * 8);
            let corner = (b8 >> 1) * 8 + (b8 & 1) * 2;
            let mut luma = [[0u8; 64]; 2];
            let mut chroma = [[[0u8; 16]; 2]; 2];
            let mut used = [None; 2];
            for list in 0..2 {
                let r = motion.ref_idx[list][b8];
                let Some(reference) = usize::try_from(r).ok().and_then(|r| f.refs[list].get(r)) else {
                    continue;
                };
                let mv = motion.mv[list][corner];
                let (x, y) = ((x0 + bx) as i32, (y0 + by) as i32);
                mc_luma(&reference.planes[0], x, y, mv, 8, 8, &mut luma[list], 8);
                for c in 0..2 {
                    mc_chroma(&reference.planes[1 + c], x / 2, y / 2, mv, 4, 4, &mut chroma[list][c], 4);
                }
                used[list] = Some(r as usize);
            }

            let mut out_y = [0u8; 64];
            let mut out_c = [[0u8; 16]; 2];
            match used {
                [Some(r0), Some(r1)] => {
                    let weights = f.bipred.and_then(|t| t.weights(r0, r1));
                    let mix = |a: &[u8], b: &[u8], out: &mut [u8]| match weights {
                        Some((w0, w1)) => weighted_bipred(a, b, w0, w1, out),
                        None => avg_bipred(a, b, out),
                    };
                    mix(&luma[0], &luma[1], &mut out_y);
                    for c in 0..2 {
                        mix(&chroma[0][c], &chroma[1][c], &mut out_c[c]);
                    }
                }
                [Some(_), None] => {
                    out_y = luma[0];
                    out_c = chroma[0];
                }
                [None, Some(_)] => {
                    out_y = luma[1];
                    out_c = chroma[1];
                }
                [None, None] => continue,
            }
            for row in 0..8 {
                let at = (by + row) * 16 + bx;
                pred_y[at..at + 8].copy_from_slice(&out_y[row * 8..row * 8 + 8]);
            }
            for c in 0..2 {
                for row in 0..4 {
                    let at = (by / 2 + row) * 8 + bx / 2;
                    pred_c[c][at..at + 4].copy_from_slice(&out_c[c][row * 4..row * 4 + 4]);
                }
            }
        }
        (pred_y, pred_c)
    }

    /// 以给定运动信息补偿并编码残差; 代价为补偿失真
    fn code_inter(
        &self,
        an: &Analyser<'_>,
        src: &MbSource,
        qp: i32,
        mb_type: MbType,
        motion: MotionField,
        allow_8x8: bool,
    ) -> CodedMb {
        let f = self.f;
        let (pred_y, pred_c) = self.predict_inter(&motion);
        let cost = f.cost.cost(&src.y, 16, &pred_y, 16, 16, 16);
        let use_8x8 = allow_8x8 && f.pps.transform_8x8_mode && !f.lossless && an.prefer_transform_8x8(&src.y, &pred_y);
        let mode = QuantMode {
            intra: false,
            lossless: f.lossless,
        };
        let (luma, recon_y) = code_luma_blocks(&src.y, &pred_y, qp, use_8x8, mode);
        let qpc = chroma_qp(qp, f.pps.chroma_qp_index_offset);
        let (chroma, recon_c) = code_chroma([&src.c[0], &src.c[1]], [&pred_c[0], &pred_c[1]], qpc, mode);
        let cbp = luma_cbp(&luma) | chroma_cbp(&chroma) << 4;
        CodedMb {
            mb_type,
            cost,
            motion,
            i16_mode: I16_DC,
            i4_modes: [I4_DC; 16],
            chroma_mode: 0,
            transform_8x8: use_8x8 && cbp & 15 != 0,
            luma,
            chroma,
            cbp,
            recon_y,
            recon_c,
        }
    }

    fn list_planes(&self, list: usize) -> Vec<&'a Plane> {
        self.f.refs[list].iter().map(|&p| &p.planes[0]).collect()
    }

    /// P 宏块的分区搜索, 子分区沿用 16x16 的最佳参考
    fn search_p(&mut self, an: &Analyser<'_>, src: &MbSource, refs: &[&Plane]) -> InterCandidate {
        let lambda = an.lambda();
        let range = self.ctx.mv_range;
        let (x0, y0) = self.origin();
        let (x0, y0) = (x0 as i32, y0 as i32);

        let ctx = &self.ctx;
        let (r, mv, cost) = an.search_refs(&src.y, 16, refs, x0, y0, 16, 16, range, |r| ctx.predict_mv(0, r, 0, 4));
        let mut best = InterCandidate {
            mb_type: MbType::P16x16,
            motion: MotionField::single(0, r as i8, mv),
            cost: cost.saturating_add(lambda * p_type_bits(MbType::P16x16)),
        };

        for mb_type in [MbType::P16x8, MbType::P8x16, MbType::P8x8] {
            let mut motion = MotionField::default();
            let mut total = lambda * p_type_bits(mb_type);
            for (i, &p) in partitions(mb_type).iter().enumerate() {
                let pmv = predict_partition(&self.ctx, mb_type, 0, r as i8, i, p);
                let (px, py) = ((p.raster & 3) * 4, (p.raster >> 2) * 4);
                let (mv, c) = an.motion_search(
                    &src.y[py * 16 + px..],
                    16,
                    refs[r],
                    x0 + px as i32,
                    y0 + py as i32,
                    p.w * 4,
                    p.h * 4,
                    pmv,
                    range,
                );
                total = total.saturating_add(c).saturating_add(ref_cost(lambda, r, refs.len()));
                motion.set(0, p, r as i8, mv);
                self.ctx.fill_motion(0, p.raster, p.w, p.h, r as i8, mv, [0, 0]);
            }
            reset_motion_cache(&mut self.ctx);
            if total < best.cost {
                best = InterCandidate {
                    mb_type,
                    motion,
                    cost: total,
                };
            }
        }
        best
    }

    fn decide_p(&mut self, an: &Analyser<'_>, src: &MbSource, qp: i32) -> CodedMb {
        let refs = self.list_planes(0);
        if refs.is_empty() {
            let intra = self.intra_candidate(an, src, qp);
            return self.code_intra(an, src, qp, intra);
        }

        let pskip_mv = self.ctx.predict_mv_pskip();
        let skip = self.code_inter(an, src, qp, MbType::PSkip, MotionField::single(0, 0, pskip_mv), false);
        if skip.cbp == 0 {
            return skip;
        }

        let best = self.search_p(an, src, &refs);
        let intra = self.intra_candidate(an, src, qp);
        if intra.cost() < best.cost {
            return self.code_intra(an, src, qp, intra);
        }
        let mut coded = self.code_inter(an, src, qp, best.mb_type, best.motion, true);
        coded.cost = best.cost;
        if coded.mb_type == MbType::P16x16
            && coded.cbp == 0
            && best.motion.ref_idx[0][0] == 0
            && best.motion.mv[0][0] == pskip_mv
        {
            coded.mb_type = MbType::PSkip;
            coded.transform_8x8 = false;
        }
        coded
    }

    fn decide_b(&mut self, an: &Analyser<'_>, src: &MbSource, qp: i32) -> CodedMb {
        let lambda = an.lambda();
        let direct = match &self.direct {
            Some(d) => {
                let m = d.derive(self.ctx.mb_xy);
                MotionField {
                    ref_idx: m.ref_idx,
                    mv: m.mv,
                }
            }
            None => MotionField {
                ref_idx: [[0; 4]; 2],
                mv: [[[0; 2]; 16]; 2],
            },
        };
        let skip = self.code_inter(an, src, qp, MbType::BSkip, direct, false);
        if skip.cbp == 0 {
            return skip;
        }
        let mut best = InterCandidate {
            mb_type: MbType::BDirect,
            motion: direct,
            cost: skip.cost.saturating_add(lambda),
        };

        let refs = [self.list_planes(0), self.list_planes(1)];
        let range = self.ctx.mv_range;
        let (x0, y0) = self.origin();
        let (x0, y0) = (x0 as i32, y0 as i32);
        let mut single = [(0usize, [0i16; 2], u32::MAX); 2];
        for list in 0..2 {
            if refs[list].is_empty() {
                continue;
            }
            let ctx = &self.ctx;
            single[list] = an.search_refs(&src.y, 16, &refs[list], x0, y0, 16, 16, range, |r| {
                ctx.predict_mv(list, r, 0, 4)
            });
            let cost = single[list].2.saturating_add(lambda * 3);
            if cost < best.cost {
                best = InterCandidate {
                    mb_type: if list == 0 { MbType::BL0 } else { MbType::BL1 },
                    motion: MotionField::single(list, single[list].0 as i8, single[list].1),
                    cost,
                };
            }
        }

        if single.iter().all(|s| s.2 != u32::MAX) {
            let mut motion = MotionField::single(0, single[0].0 as i8, single[0].1);
            motion.set(1, PART_16X16[0], single[1].0 as i8, single[1].1);
            let (pred, _) = self.predict_inter(&motion);
            let mut cost = self.f.cost.cost(&src.y, 16, &pred, 16, 16, 16).saturating_add(lambda * 5);
            for (list, &(r, mv, _)) in single.iter().enumerate() {
                let pmv = self.ctx.predict_mv(list, r as i8, 0, 4);
                cost = cost
                    .saturating_add(mv_cost(lambda, mv, pmv))
                    .saturating_add(ref_cost(lambda, r, refs[list].len()));
            }
            if cost < best.cost {
                best = InterCandidate {
                    mb_type: MbType::BBi,
                    motion,
                    cost,
                };
            }
        }

        let intra = self.intra_candidate(an, src, qp);
        if intra.cost() < best.cost {
            return self.code_intra(an, src, qp, intra);
        }
        let mut coded = self.code_inter(an, src, qp, best.mb_type, best.motion, true);
        coded.cost = best.cost;
        if coded.mb_type == MbType::BDirect && coded.cbp == 0 {
            coded.mb_type = MbType::BSkip;
            coded.transform_8x8 = false;
        }
        coded
    }

    // --------------------------------------------------------
    // 语法写出
    // --------------------------------------------------------

    /// 写出一个宏块并返回其记录
    fn write_macroblock(&mut self, mb: &CodedMb, qp: i32) -> MbRecord {
        let f = self.f;
        let mb_type = mb.mb_type;
        let intra = mb_type.is_intra();
        let b_slice = self.slice_type == SliceType::B;
        let start = self.cabac.bits_written();

        let mut record = MbRecord {
            mb_type,
            qp: self.qp_pred as u8,
            i16_mode: mb.i16_mode,
            chroma_pred_mode: mb.chroma_mode,
            ref_idx: mb.motion.ref_idx,
            mv: mb.motion.mv,
            ..MbRecord::default()
        };
        if mb_type == MbType::I4x4 {
            record.intra4x4_modes = mb.i4_modes;
        }

        if self.slice_type != SliceType::I {
            let inc = self.ctx.skip_ctx_inc();
            write_mb_skip(&mut self.cabac, b_slice, inc, mb_type.is_skip());
        }
        if mb_type.is_skip() {
            self.prev_qp_delta_nonzero = false;
            self.stats.header_bits += (self.cabac.bits_written() - start) as u64;
            return record;
        }

        let i16 = (mb_type == MbType::I16x16).then_some(I16x16Type {
            pred_mode: mb.i16_mode,
            cbp_chroma: mb.cbp >> 4,
            luma_ac: mb.cbp & 15 != 0,
        });
        match self.slice_type {
            SliceType::I => {
                let inc = self.ctx.mb_type_i_ctx_inc();
                write_intra_mb_type(&mut self.cabac, Some(inc), false, i16);
            }
            SliceType::P => write_mb_type_p(&mut self.cabac, mb_type, i16),
            SliceType::B => {
                let inc = self.ctx.mb_type_b_ctx_inc();
                write_mb_type_b(&mut self.cabac, inc, mb_type, i16);
            }
        }

        if mb_type == MbType::P8x8 {
            for _ in 0..4 {
                write_sub_mb_type_p8x8(&mut self.cabac);
            }
        }
        if mb_type == MbType::I4x4 {
            if f.pps.transform_8x8_mode {
                let inc = self.ctx.transform_8x8_ctx_inc();
                write_transform_8x8_flag(&mut self.cabac, inc, false);
            }
            for &raster in &BLOCK_RASTER {
                let predicted = self.ctx.predicted_intra4x4_mode(raster);
                write_intra4x4_mode(&mut self.cabac, predicted, mb.i4_modes[raster]);
                self.ctx.intra4x4[scan8(raster)] = mb.i4_modes[raster];
            }
        }
        if intra {
            let inc = self.ctx.chroma_pred_ctx_inc();
            write_chroma_pred_mode(&mut self.cabac, inc, mb.chroma_mode);
        } else if !mb_type.is_direct() {
            record.mvd = self.write_motion(mb);
        }

        let cbp = mb.cbp;
        record.cbp = cbp;
        if mb_type != MbType::I16x16 {
            let (left, top) = self.ctx.neighbour_cbp();
            write_cbp(&mut self.cabac, cbp, left, top);
        }
        if cbp & 15 != 0 && f.pps.transform_8x8_mode && !intra {
            let inc = self.ctx.transform_8x8_ctx_inc();
            write_transform_8x8_flag(&mut self.cabac, inc, mb.transform_8x8);
            record.transform_8x8 = mb.transform_8x8;
        }

        if cbp != 0 || mb_type == MbType::I16x16 {
            let delta = qp - self.qp_pred;
            write_qp_delta(&mut self.cabac, self.prev_qp_delta_nonzero, delta);
            self.prev_qp_delta_nonzero = delta != 0;
            self.qp_pred = qp;
            record.qp = qp as u8;
        } else {
            self.prev_qp_delta_nonzero = false;
        }

        let texture_start = self.cabac.bits_written();
        self.stats.header_bits += (texture_start - start) as u64;
        self.write_residual(mb, &mut record);
        self.stats.texture_bits += (self.cabac.bits_written() - texture_start) as u64;
        record
    }

    /// 写出 ref_idx 与 mvd, 返回各 4x4 块的 |mvd|
    fn write_motion(&mut self, mb: &CodedMb) -> [[[u16; 2]; 16]; 2] {
        reset_motion_cache(&mut self.ctx);
        let parts = partitions(mb.mb_type);
        let mut mvds = [[[0u16; 2]; 16]; 2];

        for list in 0..2 {
            if !mb.mb_type.uses_list(list) {
                continue;
            }
            for p in parts {
                let r = mb.motion.ref_idx[list][block8_of_raster(p.raster)];
                if self.num_active[list] > 1 {
                    let inc = self.ctx.ref_ctx_inc(list, p.raster);
                    write_ref_idx(&mut self.cabac, inc, r.max(0) as u32);
                }
                self.ctx.fill_motion(list, p.raster, p.w, p.h, r, [0, 0], [0, 0]);
            }
        }

        for list in 0..2 {
            if !mb.mb_type.uses_list(list) {
                continue;
            }
            for (i, &p) in parts.iter().enumerate() {
                let r = mb.motion.ref_idx[list][block8_of_raster(p.raster)];
                let mv = mb.motion.mv[list][p.raster];
                let pmv = predict_partition(&self.ctx, mb.mb_type, list, r, i, p);
                let d = [
                    i32::from(mv[0]) - i32::from(pmv[0]),
                    i32::from(mv[1]) - i32::from(pmv[1]),
                ];
                for (comp, &value) in d.iter().enumerate() {
                    let sum = self.ctx.mvd_abs_sum(list, p.raster, comp);
                    write_mvd(&mut self.cabac, comp, sum, value);
                }
                let abs = d.map(|v| v.unsigned_abs().min(u32::from(u16::MAX)) as u16);
                self.ctx.fill_motion(list, p.raster, p.w, p.h, r, mv, abs);
                let (bx, by) = (p.raster & 3, p.raster >> 2);
                for y in by..by + p.h {
                    for x in bx..bx + p.w {
                        mvds[list][y * 4 + x] = abs;
                    }
                }
            }
        }
        mvds
    }

    fn write_residual(&mut self, mb: &CodedMb, record: &mut MbRecord) {
        let intra = mb.mb_type.is_intra();
        let cbp = mb.cbp;
        match &mb.luma {
            LumaCoeffs::Intra16 { dc, ac } => {
                let inc = self.ctx.luma_dc_cbf_ctx_inc();
                if write_residual_block(&mut self.cabac, &CAT_LUMA_DC, Some(inc), &zigzag16(&dc.levels)) > 0 {
                    record.dc_cbf |= 1;
                }
                if cbp & 15 != 0 {
                    for &raster in &BLOCK_RASTER {
                        let inc = self.ctx.luma_cbf_ctx_inc(raster, true);
                        let scanned = zigzag16(&ac[raster].levels);
                        let n = write_residual_block(&mut self.cabac, &CAT_LUMA_AC, Some(inc), &scanned[1..]);
                        self.ctx.nnz[scan8(raster)] = n;
                        record.nnz[raster] = n;
                    }
                }
            }
            LumaCoeffs::Blocks4x4(blocks) => {
                for (i, &raster) in BLOCK_RASTER.iter().enumerate() {
                    if (cbp >> (i / 4)) & 1 == 0 {
                        continue;
                    }
                    let inc = self.ctx.luma_cbf_ctx_inc(raster, intra);
                    let n = write_residual_block(
                        &mut self.cabac,
                        &CAT_LUMA_4X4,
                        Some(inc),
                        &zigzag16(&blocks[raster].levels),
                    );
                    self.ctx.nnz[scan8(raster)] = n;
                    record.nnz[raster] = n;
                }
            }
            LumaCoeffs::Blocks8x8(blocks) => {
                for (b8, block) in blocks.iter().enumerate() {
                    if (cbp >> b8) & 1 == 0 {
                        continue;
                    }
                    let n = write_residual_block(&mut self.cabac, &CAT_LUMA_8X8, None, &zigzag64(&block.levels));
                    for raster in (0..16).filter(|&r| block8_of_raster(r) == b8) {
                        self.ctx.nnz[scan8(raster)] = n;
                        record.nnz[raster] = n;
                    }
                }
            }
        }

        let chroma_cbp = cbp >> 4;
        if chroma_cbp != 0 {
            for c in 0..2 {
                let inc = self.ctx.chroma_dc_cbf_ctx_inc(c, intra);
                let n = write_residual_block(&mut self.cabac, &CAT_CHROMA_DC, Some(inc), &mb.chroma.dc[c].levels[..4]);
                if n > 0 {
                    record.dc_cbf |= 2 << c;
                }
            }
        }
        if chroma_cbp == 2 {
            for c in 0..2 {
                let mut current = [0u8; 4];
                for b in 0..4 {
                    let inc = self.ctx.chroma_ac_cbf_ctx_inc(c, b & 1, b >> 1, &current, intra);
                    let scanned = zigzag16(&mb.chroma.ac[c][b].levels);
                    current[b] = write_residual_block(&mut self.cabac, &CAT_CHROMA_AC, Some(inc), &scanned[1..]);
                }
                record.nnz[16 + c * 4..20 + c * 4].copy_from_slice(&current);
            }
        }
    }
}

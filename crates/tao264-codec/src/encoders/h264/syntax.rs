//! CABAC 语法元素二值化与上下文索引选择.
//!
//! 每个函数负责一个语法元素: 给定由宏块上下文算出的 ctxIdxInc,
//! 按标准的二值化方案产生 bin 串并交给 [`CabacEncoder`].

use super::cabac::CabacEncoder;
use super::macroblock::MbType;
use super::tables::{LAST_COEFF_OFFSET_8X8, SIG_COEFF_OFFSET_8X8};

// ============================================================
// 残差块类别
// ============================================================

/// 残差块类别 (ctxBlockCat) 对应的上下文偏移
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCat {
    /// ctxBlockCat
    pub cat: u8,
    /// coded_block_flag 上下文起点
    pub cbf_offset: usize,
    /// significant_coeff_flag 上下文起点
    pub sig_offset: usize,
    /// last_significant_coeff_flag 上下文起点
    pub last_offset: usize,
    /// coeff_abs_level_minus1 上下文起点
    pub abs_offset: usize,
    /// 块内最大系数个数
    pub max_coeff: usize,
}

/// Intra16x16 亮度 DC, 类别 0
pub const CAT_LUMA_DC: BlockCat = BlockCat {
    cat: 0,
    cbf_offset: 85,
    sig_offset: 105,
    last_offset: 166,
    abs_offset: 227,
    max_coeff: 16,
};

/// Intra16x16 亮度 AC, 类别 1
pub const CAT_LUMA_AC: BlockCat = BlockCat {
    cat: 1,
    cbf_offset: 89,
    sig_offset: 120,
    last_offset: 181,
    abs_offset: 237,
    max_coeff: 15,
};

/// 亮度 4x4, 类别 2
pub const CAT_LUMA_4X4: BlockCat = BlockCat {
    cat: 2,
    cbf_offset: 93,
    sig_offset: 134,
    last_offset: 195,
    abs_offset: 247,
    max_coeff: 16,
};

/// 色度 DC (4:2:0), 类别 3
pub const CAT_CHROMA_DC: BlockCat = BlockCat {
    cat: 3,
    cbf_offset: 97,
    sig_offset: 149,
    last_offset: 210,
    abs_offset: 257,
    max_coeff: 4,
};

/// 色度 AC, 类别 4
pub const CAT_CHROMA_AC: BlockCat = BlockCat {
    cat: 4,
    cbf_offset: 101,
    sig_offset: 152,
    last_offset: 213,
    abs_offset: 266,
    max_coeff: 15,
};

/// 亮度 8x8, 类别 5 (4:2:0 下不编码 coded_block_flag)
pub const CAT_LUMA_8X8: BlockCat = BlockCat {
    cat: 5,
    cbf_offset: 0,
    sig_offset: 402,
    last_offset: 417,
    abs_offset: 426,
    max_coeff: 64,
};

// ============================================================
// 宏块层语法元素
// ============================================================

/// Intra16x16 的 mb_type 组成部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I16x16Type {
    /// 预测模式 (0..=3)
    pub pred_mode: u8,
    /// 色度 CBP (0..=2)
    pub cbp_chroma: u8,
    /// 亮度 AC 是否有非零系数 (CBP 亮度为 15)
    pub luma_ac: bool,
}

impl I16x16Type {
    /// I slice 中的 mb_type 数值
    pub fn mb_type_value(&self) -> u32 {
        1 + u32::from(self.pred_mode)
            + 4 * u32::from(self.cbp_chroma)
            + if self.luma_ac { 12 } else { 0 }
    }
}

/// 写入 mb_skip_flag
pub(super) fn write_mb_skip(cabac: &mut CabacEncoder, b_slice: bool, ctx_inc: usize, skip: bool) {
    let base = if b_slice { 24 } else { 11 };
    cabac.encode_decision(base + ctx_inc, u32::from(skip));
}

/// 写入帧内 mb_type 的主体 (I slice 完整 mb_type, 或 P/B slice 中的帧内后缀)
///
/// `i_slice_ctx_inc` 为 `Some` 时按 I slice 规则 (上下文起点 3, 首 bin 依赖邻居);
/// 为 `None` 时按 P (起点 17) 或 B (起点 32) 后缀规则.
pub(super) fn write_intra_mb_type(
    cabac: &mut CabacEncoder,
    i_slice_ctx_inc: Option<usize>,
    b_slice: bool,
    i16x16: Option<I16x16Type>,
) {
    match i_slice_ctx_inc {
        Some(ctx_inc) => {
            let Some(t) = i16x16 else {
                cabac.encode_decision(3 + ctx_inc, 0);
                return;
            };
            cabac.encode_decision(3 + ctx_inc, 1);
            cabac.encode_terminate(0);
            cabac.encode_decision(3 + 3, u32::from(t.luma_ac));
            cabac.encode_decision(3 + 4, u32::from(t.cbp_chroma != 0));
            if t.cbp_chroma != 0 {
                cabac.encode_decision(3 + 5, u32::from(t.cbp_chroma == 2));
            }
            cabac.encode_decision(3 + 6, u32::from(t.pred_mode >> 1));
            cabac.encode_decision(3 + 7, u32::from(t.pred_mode & 1));
        }
        None => {
            let base = if b_slice { 32 } else { 17 };
            let Some(t) = i16x16 else {
                cabac.encode_decision(base, 0);
                return;
            };
            cabac.encode_decision(base, 1);
            cabac.encode_terminate(0);
            cabac.encode_decision(base + 1, u32::from(t.luma_ac));
            cabac.encode_decision(base + 2, u32::from(t.cbp_chroma != 0));
            if t.cbp_chroma != 0 {
                cabac.encode_decision(base + 2, u32::from(t.cbp_chroma == 2));
            }
            cabac.encode_decision(base + 3, u32::from(t.pred_mode >> 1));
            cabac.encode_decision(base + 3, u32::from(t.pred_mode & 1));
        }
    }
}

/// 写入 P slice 的 mb_type; 帧内宏块写前缀 "1" 后接帧内后缀
pub(super) fn write_mb_type_p(cabac: &mut CabacEncoder, mb_type: MbType, i16x16: Option<I16x16Type>) {
    match mb_type {
        MbType::P16x16 => {
            cabac.encode_decision(14, 0);
            cabac.encode_decision(15, 0);
            cabac.encode_decision(16, 0);
        }
        MbType::P8x8 => {
            cabac.encode_decision(14, 0);
            cabac.encode_decision(15, 0);
            cabac.encode_decision(16, 1);
        }
        MbType::P16x8 => {
            cabac.encode_decision(14, 0);
            cabac.encode_decision(15, 1);
            cabac.encode_decision(17, 1);
        }
        MbType::P8x16 => {
            cabac.encode_decision(14, 0);
            cabac.encode_decision(15, 1);
            cabac.encode_decision(17, 0);
        }
        MbType::I4x4 | MbType::I16x16 => {
            cabac.encode_decision(14, 1);
            write_intra_mb_type(cabac, None, false, i16x16);
        }
        other => debug_assert!(false, "P slice 不支持的宏块类型: {:?}", other),
    }
}

/// 写入 B slice 的 mb_type
pub(super) fn write_mb_type_b(
    cabac: &mut CabacEncoder,
    ctx_inc: usize,
    mb_type: MbType,
    i16x16: Option<I16x16Type>,
) {
    match mb_type {
        MbType::BDirect => cabac.encode_decision(27 + ctx_inc, 0),
        MbType::BL0 | MbType::BL1 => {
            cabac.encode_decision(27 + ctx_inc, 1);
            cabac.encode_decision(27 + 3, 0);
            cabac.encode_decision(27 + 5, u32::from(mb_type == MbType::BL1));
        }
        MbType::BBi => {
            cabac.encode_decision(27 + ctx_inc, 1);
            cabac.encode_decision(27 + 3, 1);
            cabac.encode_decision(27 + 4, 0);
            cabac.encode_decision(27 + 5, 0);
            cabac.encode_decision(27 + 5, 0);
            cabac.encode_decision(27 + 5, 0);
        }
        MbType::I4x4 | MbType::I16x16 => {
            cabac.encode_decision(27 + ctx_inc, 1);
            cabac.encode_decision(27 + 3, 1);
            cabac.encode_decision(27 + 4, 1);
            cabac.encode_decision(27 + 5, 1);
            cabac.encode_decision(27 + 5, 0);
            cabac.encode_decision(27 + 5, 1);
            write_intra_mb_type(cabac, None, true, i16x16);
        }
        other => debug_assert!(false, "B slice 不支持的宏块类型: {:?}", other),
    }
}

/// 写入 P slice 的 sub_mb_type (仅 P_L0_8x8)
pub(super) fn write_sub_mb_type_p8x8(cabac: &mut CabacEncoder) {
    cabac.encode_decision(21, 1);
}

/// 写入 transform_size_8x8_flag
pub(super) fn write_transform_8x8_flag(cabac: &mut CabacEncoder, ctx_inc: usize, flag: bool) {
    cabac.encode_decision(399 + ctx_inc, u32::from(flag));
}

/// 写入一个 4x4 帧内预测模式 (prev_intra4x4_pred_mode_flag + rem_intra4x4_pred_mode)
pub(super) fn write_intra4x4_mode(cabac: &mut CabacEncoder, predicted: i8, mode: i8) {
    if mode == predicted {
        cabac.encode_decision(68, 1);
        return;
    }
    cabac.encode_decision(68, 0);
    let rem = if mode < predicted { mode } else { mode - 1 } as u32;
    cabac.encode_decision(69, rem & 1);
    cabac.encode_decision(69, (rem >> 1) & 1);
    cabac.encode_decision(69, (rem >> 2) & 1);
}

/// 写入 intra_chroma_pred_mode (TU, cMax = 3)
pub(super) fn write_chroma_pred_mode(cabac: &mut CabacEncoder, ctx_inc: usize, mode: u8) {
    cabac.encode_decision(64 + ctx_inc, u32::from(mode > 0));
    if mode > 0 {
        cabac.encode_decision(67, u32::from(mode > 1));
        if mode > 1 {
            cabac.encode_decision(67, u32::from(mode > 2));
        }
    }
}

/// 写入 coded_block_pattern
///
/// `left` / `top` 为相邻宏块的 CBP; `None` 表示不可用, 跳过宏块传 `Some(0)`.
pub(super) fn write_cbp(cabac: &mut CabacEncoder, cbp: u8, left: Option<u8>, top: Option<u8>) {
    for b8 in 0..4u8 {
        let (x, y) = (b8 & 1, b8 >> 1);
        let cond_a = if x > 0 {
            (cbp >> (b8 - 1)) & 1 == 0
        } else {
            left.is_some_and(|c| (c >> (b8 + 1)) & 1 == 0)
        };
        let cond_b = if y > 0 {
            (cbp >> (b8 - 2)) & 1 == 0
        } else {
            top.is_some_and(|c| (c >> (b8 + 2)) & 1 == 0)
        };
        let ctx = 73 + usize::from(cond_a) + 2 * usize::from(cond_b);
        cabac.encode_decision(ctx, u32::from((cbp >> b8) & 1));
    }

    let chroma = cbp >> 4;
    let ca = left.map_or(0, |c| c >> 4);
    let cb = top.map_or(0, |c| c >> 4);
    let ctx = 77 + usize::from(ca != 0) + 2 * usize::from(cb != 0);
    cabac.encode_decision(ctx, u32::from(chroma != 0));
    if chroma != 0 {
        let ctx = 81 + usize::from(ca == 2) + 2 * usize::from(cb == 2);
        cabac.encode_decision(ctx, u32::from(chroma == 2));
    }
}

/// 写入 mb_qp_delta (映射后一元编码)
pub(super) fn write_qp_delta(cabac: &mut CabacEncoder, prev_nonzero: bool, delta: i32) {
    let mapped = if delta > 0 {
        (2 * delta - 1) as u32
    } else {
        (-2 * delta) as u32
    };
    let mut ctx = 60 + usize::from(prev_nonzero);
    for _ in 0..mapped {
        cabac.encode_decision(ctx, 1);
        ctx = if ctx < 62 { 62 } else { 63 };
    }
    cabac.encode_decision(ctx, 0);
}

/// 写入 ref_idx_lX (一元编码)
pub(super) fn write_ref_idx(cabac: &mut CabacEncoder, ctx_inc: usize, ref_idx: u32) {
    let mut ctx = 54 + ctx_inc;
    for _ in 0..ref_idx {
        cabac.encode_decision(ctx, 1);
        ctx = if ctx < 58 { 58 } else { 59 };
    }
    cabac.encode_decision(ctx, 0);
}

/// 写入一个 mvd 分量 (UEG3, 有符号, uCoff = 9)
///
/// `comp` 为 0 (水平) 或 1 (垂直), `abs_sum` 为左、上邻居同分量 |mvd| 之和.
pub(super) fn write_mvd(cabac: &mut CabacEncoder, comp: usize, abs_sum: u32, value: i32) {
    let base = if comp == 0 { 40 } else { 47 };
    let inc0 = if abs_sum < 3 {
        0
    } else if abs_sum > 32 {
        2
    } else {
        1
    };
    let abs = value.unsigned_abs();
    if abs == 0 {
        cabac.encode_decision(base + inc0, 0);
        return;
    }
    cabac.encode_decision(base + inc0, 1);
    let prefix = abs.min(9);
    let mut inc = 3;
    for _ in 1..prefix {
        cabac.encode_decision(base + inc, 1);
        if inc < 6 {
            inc += 1;
        }
    }
    if abs < 9 {
        cabac.encode_decision(base + inc, 0);
    } else {
        cabac.encode_exp_golomb_bypass(abs - 9, 3);
    }
    cabac.encode_bypass(u32::from(value < 0));
}

/// 写入 end_of_slice_flag
pub(super) fn write_end_of_slice(cabac: &mut CabacEncoder, last: bool) {
    cabac.encode_terminate(u32::from(last));
}

// ============================================================
// 残差
// ============================================================

/// 写入一个残差块
///
/// `coeffs` 为扫描顺序的电平, 长度等于 `cat.max_coeff`.
/// `cbf_ctx_inc` 为 `None` 时不编码 coded_block_flag (8x8 块), 此时块必须含非零系数.
/// 返回块内非零系数个数.
pub(super) fn write_residual_block(
    cabac: &mut CabacEncoder,
    cat: &BlockCat,
    cbf_ctx_inc: Option<usize>,
    coeffs: &[i32],
) -> u8 {
    debug_assert_eq!(coeffs.len(), cat.max_coeff, "残差块系数个数与类别不符");
    let last = coeffs.iter().rposition(|&c| c != 0);
    if let Some(inc) = cbf_ctx_inc {
        cabac.encode_decision(cat.cbf_offset + inc, u32::from(last.is_some()));
    }
    let Some(last) = last else {
        debug_assert!(cbf_ctx_inc.is_some(), "8x8 块不能全零");
        return 0;
    };

    let is_8x8 = cat.cat == 5;
    let is_chroma_dc = cat.cat == 3;
    for (i, &c) in coeffs.iter().enumerate().take(cat.max_coeff - 1) {
        let (sig_inc, last_inc) = if is_8x8 {
            (
                usize::from(SIG_COEFF_OFFSET_8X8[i]),
                usize::from(LAST_COEFF_OFFSET_8X8[i]),
            )
        } else if is_chroma_dc {
            (i.min(2), i.min(2))
        } else {
            (i, i)
        };
        let sig = c != 0;
        cabac.encode_decision(cat.sig_offset + sig_inc, u32::from(sig));
        if sig {
            let is_last = i == last;
            cabac.encode_decision(cat.last_offset + last_inc, u32::from(is_last));
            if is_last {
                break;
            }
        }
    }

    let gt1_cap = if is_chroma_dc { 3 } else { 4 };
    let mut num_eq1 = 0usize;
    let mut num_gt1 = 0usize;
    let mut nnz = 0u8;
    for &c in coeffs[..=last].iter().rev() {
        if c == 0 {
            continue;
        }
        nnz += 1;
        let abs_m1 = c.unsigned_abs() - 1;
        let inc0 = if num_gt1 != 0 { 0 } else { (1 + num_eq1).min(4) };
        cabac.encode_decision(cat.abs_offset + inc0, u32::from(abs_m1 > 0));
        if abs_m1 > 0 {
            let inc = 5 + num_gt1.min(gt1_cap);
            let prefix = abs_m1.min(14);
            for _ in 1..prefix {
                cabac.encode_decision(cat.abs_offset + inc, 1);
            }
            if abs_m1 < 14 {
                cabac.encode_decision(cat.abs_offset + inc, 0);
            } else {
                cabac.encode_exp_golomb_bypass(abs_m1 - 14, 0);
            }
            num_gt1 += 1;
        } else {
            num_eq1 += 1;
        }
        cabac.encode_bypass(u32::from(c < 0));
    }
    nnz
}

#[cfg(test)]
mod tests {
    use tao264_core::bitwriter::BitWriter;

    use super::*;
    use crate::encoders::h264::cabac::{CabacDecoder, ContextBank};

    /// 按标准解码流程读回残差块, 用于验证编码端
    fn read_residual_block(
        dec: &mut CabacDecoder,
        cat: &BlockCat,
        cbf_ctx_inc: Option<usize>,
    ) -> Vec<i32> {
        let n = cat.max_coeff;
        let mut coeffs = vec![0i32; n];
        if let Some(inc) = cbf_ctx_inc {
            if dec.decode_decision(cat.cbf_offset + inc) == 0 {
                return coeffs;
            }
        }
        let mut sig_pos = Vec::new();
        let mut ended = false;
        for i in 0..n - 1 {
            let (sig_inc, last_inc) = if cat.cat == 5 {
                (
                    usize::from(SIG_COEFF_OFFSET_8X8[i]),
                    usize::from(LAST_COEFF_OFFSET_8X8[i]),
                )
            } else if cat.cat == 3 {
                (i.min(2), i.min(2))
            } else {
                (i, i)
            };
            if dec.decode_decision(cat.sig_offset + sig_inc) == 1 {
                sig_pos.push(i);
                if dec.decode_decision(cat.last_offset + last_inc) == 1 {
                    ended = true;
                    break;
                }
            }
        }
        if !ended {
            sig_pos.push(n - 1);
        }
        let cap = if cat.cat == 3 { 3 } else { 4 };
        let (mut eq1, mut gt1) = (0usize, 0usize);
        for &pos in sig_pos.iter().rev() {
            let inc0 = if gt1 != 0 { 0 } else { (1 + eq1).min(4) };
            let mut abs_m1 = dec.decode_decision(cat.abs_offset + inc0);
            if abs_m1 == 1 {
                let inc = 5 + gt1.min(cap);
                while abs_m1 < 14 && dec.decode_decision(cat.abs_offset + inc) == 1 {
                    abs_m1 += 1;
                }
                if abs_m1 >= 14 {
                    abs_m1 += dec.decode_exp_golomb_bypass(0);
                }
                gt1 += 1;
            } else {
                eq1 += 1;
            }
            let abs = abs_m1 as i32 + 1;
            coeffs[pos] = if dec.decode_bypass() == 1 { -abs } else { abs };
        }
        coeffs
    }

    fn bank() -> ContextBank {
        ContextBank::new(false, 1, 28)
    }

    #[test]
    fn test_residual_blocks_round_trip() {
        let luma: Vec<i32> = vec![7, -3, 0, 1, 0, 0, -1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let big: Vec<i32> = vec![40, 0, -17, 1, 1, -1, 0, 0, 2, 0, 0, 0, 0, 0, 0, 3];
        let chroma_dc: Vec<i32> = vec![-2, 1, 1, 0];
        let ac: Vec<i32> = vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, -1];
        let mut w8 = vec![0i32; 64];
        w8[0] = 12;
        w8[5] = -2;
        w8[63] = 1;

        let mut enc = CabacEncoder::new(BitWriter::new(), bank());
        assert_eq!(write_residual_block(&mut enc, &CAT_LUMA_4X4, Some(1), &luma), 4);
        assert_eq!(write_residual_block(&mut enc, &CAT_LUMA_DC, Some(0), &big), 7);
        assert_eq!(write_residual_block(&mut enc, &CAT_CHROMA_DC, Some(2), &chroma_dc), 3);
        assert_eq!(write_residual_block(&mut enc, &CAT_CHROMA_AC, Some(3), &ac), 1);
        assert_eq!(write_residual_block(&mut enc, &CAT_LUMA_AC, Some(0), &[0; 15]), 0);
        assert_eq!(write_residual_block(&mut enc, &CAT_LUMA_8X8, None, &w8), 3);
        enc.encode_terminate(1);
        let data = enc.finish().finish();

        let mut dec = CabacDecoder::new(&data, bank());
        assert_eq!(read_residual_block(&mut dec, &CAT_LUMA_4X4, Some(1)), luma);
        assert_eq!(read_residual_block(&mut dec, &CAT_LUMA_DC, Some(0)), big);
        assert_eq!(read_residual_block(&mut dec, &CAT_CHROMA_DC, Some(2)), chroma_dc);
        assert_eq!(read_residual_block(&mut dec, &CAT_CHROMA_AC, Some(3)), ac);
        assert_eq!(read_residual_block(&mut dec, &CAT_LUMA_AC, Some(0)), vec![0; 15]);
        assert_eq!(read_residual_block(&mut dec, &CAT_LUMA_8X8, None), w8);
        assert_eq!(dec.decode_terminate(), 1);
    }

    #[test]
    fn test_mvd_and_ref_idx_round_trip() {
        let values = [0, 1, -1, 8, -9, 9, 100, -513];
        let mut enc = CabacEncoder::new(BitWriter::new(), bank());
        for (i, &v) in values.iter().enumerate() {
            write_mvd(&mut enc, i & 1, (i * 7) as u32, v);
        }
        write_ref_idx(&mut enc, 2, 3);
        write_qp_delta(&mut enc, true, -2);
        enc.encode_terminate(1);
        let data = enc.finish().finish();

        let mut dec = CabacDecoder::new(&data, bank());
        for (i, &v) in values.iter().enumerate() {
            let base = if i & 1 == 0 { 40 } else { 47 };
            let sum = (i * 7) as u32;
            let inc0 = if sum < 3 { 0 } else if sum > 32 { 2 } else { 1 };
            let mut abs = 0u32;
            if dec.decode_decision(base + inc0) == 1 {
                abs = 1;
                let mut inc = 3;
                while abs < 9 && dec.decode_decision(base + inc) == 1 {
                    abs += 1;
                    if inc < 6 {
                        inc += 1;
                    }
                }
                if abs >= 9 {
                    abs += dec.decode_exp_golomb_bypass(3);
                }
            }
            let decoded = if abs != 0 && dec.decode_bypass() == 1 {
                -(abs as i32)
            } else {
                abs as i32
            };
            assert_eq!(decoded, v, "第 {i} 个 mvd 解码不一致");
        }
        // ref_idx = 3: 1 1 1 0
        assert_eq!(dec.decode_decision(56), 1);
        assert_eq!(dec.decode_decision(58), 1);
        assert_eq!(dec.decode_decision(59), 1);
        assert_eq!(dec.decode_decision(59), 0);
        // qp_delta = -2 -> 映射值 4: 1 1 1 1 0
        assert_eq!(dec.decode_decision(61), 1);
        assert_eq!(dec.decode_decision(62), 1);
        assert_eq!(dec.decode_decision(63), 1);
        assert_eq!(dec.decode_decision(63), 1);
        assert_eq!(dec.decode_decision(63), 0);
    }

    #[test]
    fn test_i16x16_mb_type_value() {
        let t = I16x16Type {
            pred_mode: 2,
            cbp_chroma: 0,
            luma_ac: false,
        };
        assert_eq!(t.mb_type_value(), 3);
        let t = I16x16Type {
            pred_mode: 3,
            cbp_chroma: 2,
            luma_ac: true,
        };
        assert_eq!(t.mb_type_value(), 24);
    }

    #[test]
    fn test_intra_mb_type_bins_in_i_slice() {
        let t = I16x16Type {
            pred_mode: 2,
            cbp_chroma: 1,
            luma_ac: false,
        };
        let intra = || ContextBank::new(true, 0, 26);
        let mut enc = CabacEncoder::new(BitWriter::new(), intra());
        write_intra_mb_type(&mut enc, Some(1), false, Some(t));
        write_intra_mb_type(&mut enc, Some(0), false, None);
        enc.encode_terminate(1);
        let data = enc.finish().finish();

        let mut dec = CabacDecoder::new(&data, intra());
        assert_eq!(dec.decode_decision(4), 1);
        assert_eq!(dec.decode_terminate(), 0);
        assert_eq!(dec.decode_decision(6), 0, "亮度 AC 标志");
        assert_eq!(dec.decode_decision(7), 1, "色度非零");
        assert_eq!(dec.decode_decision(8), 0, "色度 CBP 为 1");
        assert_eq!(dec.decode_decision(9), 1, "预测模式高位");
        assert_eq!(dec.decode_decision(10), 0, "预测模式低位");
        assert_eq!(dec.decode_decision(3), 0, "I_NxN");
    }
}

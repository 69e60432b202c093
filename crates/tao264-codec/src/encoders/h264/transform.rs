//! H.264 系数编解码: 整数变换、量化与反量化.
//!
//! 正向路径 (编码): 残差 -> 整数 DCT -> 量化, 输出电平 (光栅顺序).
//! 反向路径 (重建): 电平 -> 反量化 -> 反变换, 与标准解码器逐位一致,
//! 编码端用它生成参考帧, 因此不允许任何舍入偏差.
//!
//! 无损模式 (变换旁路) 下电平即残差本身.

use super::tables::{
    DEQUANT4_SCALE, DEQUANT8_SCALE, QP_MAX, QUANT4_MF, QUANT8_MF, class4, class8,
};

/// 变换块类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 4x4 残差块 (亮度或色度 AC, 含 DC 位置)
    Luma4x4,
    /// 8x8 亮度残差块
    Luma8x8,
    /// Intra16x16 的 16 个亮度 DC 系数
    LumaDc,
    /// 4:2:0 单个色度平面的 4 个 DC 系数
    ChromaDc,
}

impl BlockKind {
    /// 块内系数个数
    pub const fn coeff_count(self) -> usize {
        match self {
            Self::Luma4x4 | Self::LumaDc => 16,
            Self::Luma8x8 => 64,
            Self::ChromaDc => 4,
        }
    }
}

/// 量化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantMode {
    /// 帧内块 (死区更小)
    pub intra: bool,
    /// 变换旁路 (无损)
    pub lossless: bool,
}

impl QuantMode {
    pub const INTRA: Self = Self {
        intra: true,
        lossless: false,
    };
    pub const INTER: Self = Self {
        intra: false,
        lossless: false,
    };
}

/// 量化后的系数块
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedBlock {
    pub kind: BlockKind,
    /// 电平, 光栅顺序, 仅前 `kind.coeff_count()` 项有效
    pub levels: [i32; 64],
    /// 非零电平个数
    pub nnz: u8,
}

/// 正向变换并量化
///
/// - `Luma4x4` / `Luma8x8`: `input` 为残差样本 (光栅顺序)
/// - `LumaDc` / `ChromaDc`: `input` 为各子块正向 DCT 后的 DC 系数
pub fn transform_quantize(input: &[i32], qp: i32, kind: BlockKind, mode: QuantMode) -> QuantizedBlock {
    let n = kind.coeff_count();
    debug_assert!(input.len() >= n, "输入系数不足: {} < {}", input.len(), n);
    let qp = qp.clamp(0, QP_MAX);
    let mut levels = [0i32; 64];

    if mode.lossless {
        levels[..n].copy_from_slice(&input[..n]);
    } else {
        match kind {
            BlockKind::Luma4x4 => {
                let mut block = [0i32; 16];
                block.copy_from_slice(&input[..16]);
                let coeffs = fdct4x4(&block);
                levels[..16].copy_from_slice(&coeffs);
                quant4x4(&mut levels[..16], qp, mode.intra, 0);
            }
            BlockKind::Luma8x8 => {
                let mut block = [0i32; 64];
                block.copy_from_slice(&input[..64]);
                levels = fdct8x8(&block);
                quant8x8(&mut levels, qp, mode.intra);
            }
            BlockKind::LumaDc => {
                let mut dc = [0i32; 16];
                dc.copy_from_slice(&input[..16]);
                let coeffs = hadamard4x4(&dc);
                levels[..16].copy_from_slice(&coeffs);
                quant_dc(&mut levels[..16], qp, mode.intra);
            }
            BlockKind::ChromaDc => {
                let mut dc = [0i32; 4];
                dc.copy_from_slice(&input[..4]);
                let coeffs = hadamard2x2(&dc);
                levels[..4].copy_from_slice(&coeffs);
                quant_dc(&mut levels[..4], qp, mode.intra);
            }
        }
    }

    let nnz = levels[..n].iter().filter(|&&v| v != 0).count() as u8;
    QuantizedBlock { kind, levels, nnz }
}

/// 反量化并反变换
///
/// - `Luma4x4` / `Luma8x8`: 返回残差样本
/// - `LumaDc` / `ChromaDc`: 返回反量化后的 DC 系数, 由调用方填入各子块位置 0
pub fn dequantize_inverse_transform(block: &QuantizedBlock, qp: i32, lossless: bool) -> [i32; 64] {
    let n = block.kind.coeff_count();
    let qp = qp.clamp(0, QP_MAX);
    let mut out = [0i32; 64];
    if lossless {
        out[..n].copy_from_slice(&block.levels[..n]);
        return out;
    }
    match block.kind {
        BlockKind::Luma4x4 => {
            let mut coeffs = [0i32; 16];
            coeffs.copy_from_slice(&block.levels[..16]);
            dequant4x4(&mut coeffs, qp, 0);
            out[..16].copy_from_slice(&idct4x4(&coeffs));
        }
        BlockKind::Luma8x8 => {
            let mut coeffs = block.levels;
            dequant8x8(&mut coeffs, qp);
            out = idct8x8(&coeffs);
        }
        BlockKind::LumaDc => {
            let mut dc = [0i32; 16];
            dc.copy_from_slice(&block.levels[..16]);
            let mut dc = inverse_hadamard4x4(&dc);
            dequant_luma_dc(&mut dc, qp);
            out[..16].copy_from_slice(&dc);
        }
        BlockKind::ChromaDc => {
            let mut dc = [0i32; 4];
            dc.copy_from_slice(&block.levels[..4]);
            let mut dc = hadamard2x2(&dc);
            dequant_chroma_dc(&mut dc, qp);
            out[..4].copy_from_slice(&dc);
        }
    }
    out
}

// ============================================================
// 4x4 变换
// ============================================================

/// 4x4 正向整数 DCT
pub fn fdct4x4(block: &[i32; 16]) -> [i32; 16] {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let s = i * 4;
        let s03 = block[s] + block[s + 3];
        let s12 = block[s + 1] + block[s + 2];
        let d03 = block[s] - block[s + 3];
        let d12 = block[s + 1] - block[s + 2];
        tmp[s] = s03 + s12;
        tmp[s + 1] = 2 * d03 + d12;
        tmp[s + 2] = s03 - s12;
        tmp[s + 3] = d03 - 2 * d12;
    }
    let mut out = [0i32; 16];
    for j in 0..4 {
        let s03 = tmp[j] + tmp[12 + j];
        let s12 = tmp[4 + j] + tmp[8 + j];
        let d03 = tmp[j] - tmp[12 + j];
        let d12 = tmp[4 + j] - tmp[8 + j];
        out[j] = s03 + s12;
        out[4 + j] = 2 * d03 + d12;
        out[8 + j] = s03 - s12;
        out[12 + j] = d03 - 2 * d12;
    }
    out
}

/// 4x4 反整数 DCT, 输出残差 ((x + 32) >> 6)
pub fn idct4x4(coeffs: &[i32; 16]) -> [i32; 16] {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let s = i * 4;
        let e0 = coeffs[s] + coeffs[s + 2];
        let e1 = coeffs[s] - coeffs[s + 2];
        let e2 = (coeffs[s + 1] >> 1) - coeffs[s + 3];
        let e3 = coeffs[s + 1] + (coeffs[s + 3] >> 1);
        tmp[s] = e0 + e3;
        tmp[s + 1] = e1 + e2;
        tmp[s + 2] = e1 - e2;
        tmp[s + 3] = e0 - e3;
    }
    let mut out = [0i32; 16];
    for j in 0..4 {
        let e0 = tmp[j] + tmp[8 + j];
        let e1 = tmp[j] - tmp[8 + j];
        let e2 = (tmp[4 + j] >> 1) - tmp[12 + j];
        let e3 = tmp[4 + j] + (tmp[12 + j] >> 1);
        out[j] = (e0 + e3 + 32) >> 6;
        out[4 + j] = (e1 + e2 + 32) >> 6;
        out[8 + j] = (e1 - e2 + 32) >> 6;
        out[12 + j] = (e0 - e3 + 32) >> 6;
    }
    out
}

// ============================================================
// 8x8 变换
// ============================================================

fn fdct8_1d(src: [i32; 8]) -> [i32; 8] {
    let s07 = src[0] + src[7];
    let s16 = src[1] + src[6];
    let s25 = src[2] + src[5];
    let s34 = src[3] + src[4];
    let a0 = s07 + s34;
    let a1 = s16 + s25;
    let a2 = s07 - s34;
    let a3 = s16 - s25;
    let d07 = src[0] - src[7];
    let d16 = src[1] - src[6];
    let d25 = src[2] - src[5];
    let d34 = src[3] - src[4];
    let a4 = d16 + d25 + (d07 + (d07 >> 1));
    let a5 = d07 - d34 - (d25 + (d25 >> 1));
    let a6 = d07 + d34 - (d16 + (d16 >> 1));
    let a7 = d16 - d25 + (d34 + (d34 >> 1));
    [
        a0 + a1,
        a4 + (a7 >> 2),
        a2 + (a3 >> 1),
        a5 + (a6 >> 2),
        a0 - a1,
        a6 - (a5 >> 2),
        (a2 >> 1) - a3,
        (a4 >> 2) - a7,
    ]
}

fn idct8_1d(d: [i32; 8]) -> [i32; 8] {
    let a0 = d[0] + d[4];
    let a4 = d[0] - d[4];
    let a2 = (d[2] >> 1) - d[6];
    let a6 = d[2] + (d[6] >> 1);
    let b0 = a0 + a6;
    let b2 = a4 + a2;
    let b4 = a4 - a2;
    let b6 = a0 - a6;
    let a1 = -d[3] + d[5] - d[7] - (d[7] >> 1);
    let a3 = d[1] + d[7] - d[3] - (d[3] >> 1);
    let a5 = -d[1] + d[7] + d[5] + (d[5] >> 1);
    let a7 = d[3] + d[5] + d[1] + (d[1] >> 1);
    let b1 = a1 + (a7 >> 2);
    let b7 = a7 - (a1 >> 2);
    let b3 = a3 + (a5 >> 2);
    let b5 = (a3 >> 2) - a5;
    [
        b0 + b7,
        b2 + b5,
        b4 + b3,
        b6 + b1,
        b6 - b1,
        b4 - b3,
        b2 - b5,
        b0 - b7,
    ]
}

/// 8x8 正向整数 DCT
pub fn fdct8x8(block: &[i32; 64]) -> [i32; 64] {
    let mut tmp = [0i32; 64];
    for i in 0..8 {
        let mut row = [0i32; 8];
        row.copy_from_slice(&block[i * 8..i * 8 + 8]);
        tmp[i * 8..i * 8 + 8].copy_from_slice(&fdct8_1d(row));
    }
    let mut out = [0i32; 64];
    for j in 0..8 {
        let col = std::array::from_fn(|i| tmp[i * 8 + j]);
        for (i, v) in fdct8_1d(col).into_iter().enumerate() {
            out[i * 8 + j] = v;
        }
    }
    out
}

/// 8x8 反整数 DCT, 输出残差 ((x + 32) >> 6)
pub fn idct8x8(coeffs: &[i32; 64]) -> [i32; 64] {
    let mut tmp = [0i32; 64];
    for i in 0..8 {
        let mut row = [0i32; 8];
        row.copy_from_slice(&coeffs[i * 8..i * 8 + 8]);
        tmp[i * 8..i * 8 + 8].copy_from_slice(&idct8_1d(row));
    }
    let mut out = [0i32; 64];
    for j in 0..8 {
        let col = std::array::from_fn(|i| tmp[i * 8 + j]);
        for (i, v) in idct8_1d(col).into_iter().enumerate() {
            out[i * 8 + j] = (v + 32) >> 6;
        }
    }
    out
}

// ============================================================
// DC 变换
// ============================================================

fn hadamard4_rows_cols(block: &[i32; 16]) -> [i32; 16] {
    let mut tmp = [0i32; 16];
    for i in 0..4 {
        let s = i * 4;
        let a = block[s] + block[s + 1];
        let b = block[s + 2] + block[s + 3];
        let c = block[s] - block[s + 1];
        let d = block[s + 2] - block[s + 3];
        tmp[s] = a + b;
        tmp[s + 1] = a - b;
        tmp[s + 2] = c - d;
        tmp[s + 3] = c + d;
    }
    let mut out = [0i32; 16];
    for j in 0..4 {
        let a = tmp[j] + tmp[4 + j];
        let b = tmp[8 + j] + tmp[12 + j];
        let c = tmp[j] - tmp[4 + j];
        let d = tmp[8 + j] - tmp[12 + j];
        out[j] = a + b;
        out[4 + j] = a - b;
        out[8 + j] = c - d;
        out[12 + j] = c + d;
    }
    out
}

/// 亮度 DC 正向 Hadamard 变换 (结果 (x + 1) >> 1)
pub fn hadamard4x4(dc: &[i32; 16]) -> [i32; 16] {
    hadamard4_rows_cols(dc).map(|v| (v + 1) >> 1)
}

/// 亮度 DC 反 Hadamard 变换
pub fn inverse_hadamard4x4(dc: &[i32; 16]) -> [i32; 16] {
    hadamard4_rows_cols(dc)
}

/// 色度 DC 2x2 Hadamard 变换 (正反相同)
pub fn hadamard2x2(dc: &[i32; 4]) -> [i32; 4] {
    let a = dc[0] + dc[1];
    let b = dc[0] - dc[1];
    let c = dc[2] + dc[3];
    let d = dc[2] - dc[3];
    [a + c, b + d, a - c, b - d]
}

// ============================================================
// 量化
// ============================================================

#[inline]
fn quant_value(coef: i32, mf: i32, bias: i32, qbits: u32) -> i32 {
    let level = ((i64::from(coef.unsigned_abs()) * i64::from(mf) + i64::from(bias)) >> qbits) as i32;
    if coef < 0 { -level } else { level }
}

#[inline]
fn deadzone(qbits: u32, intra: bool) -> i32 {
    if intra {
        (1 << qbits) / 3
    } else {
        (1 << qbits) / 6
    }
}

/// 4x4 量化, 从光栅位置 `start` 开始 (AC 块传 1, 位置 0 保持不变), 返回非零个数
pub fn quant4x4(coeffs: &mut [i32], qp: i32, intra: bool, start: usize) -> u8 {
    let qbits = 15 + (qp / 6) as u32;
    let bias = deadzone(qbits, intra);
    let rem = (qp % 6) as usize;
    let mut nnz = 0u8;
    for (i, c) in coeffs.iter_mut().enumerate().take(16).skip(start) {
        *c = quant_value(*c, QUANT4_MF[rem][class4(i)], bias, qbits);
        nnz += u8::from(*c != 0);
    }
    nnz
}

/// 8x8 量化, 返回非零个数
pub fn quant8x8(coeffs: &mut [i32; 64], qp: i32, intra: bool) -> u8 {
    let qbits = 16 + (qp / 6) as u32;
    let bias = deadzone(qbits, intra);
    let rem = (qp % 6) as usize;
    let mut nnz = 0u8;
    for (i, c) in coeffs.iter_mut().enumerate() {
        *c = quant_value(*c, QUANT8_MF[rem][class8(i)], bias, qbits);
        nnz += u8::from(*c != 0);
    }
    nnz
}

/// 亮度/色度 DC 量化 (Hadamard 之后), 返回非零个数
pub fn quant_dc(coeffs: &mut [i32], qp: i32, intra: bool) -> u8 {
    let qbits = 16 + (qp / 6) as u32;
    let bias = deadzone(qbits, intra);
    let mf = QUANT4_MF[(qp % 6) as usize][0];
    let mut nnz = 0u8;
    for c in coeffs.iter_mut() {
        *c = quant_value(*c, mf, bias, qbits);
        nnz += u8::from(*c != 0);
    }
    nnz
}

// ============================================================
// 反量化
// ============================================================

/// 4x4 反量化 (平坦缩放矩阵), 从光栅位置 `start` 开始
pub fn dequant4x4(coeffs: &mut [i32], qp: i32, start: usize) {
    let per = qp / 6;
    let rem = (qp % 6) as usize;
    for (i, c) in coeffs.iter_mut().enumerate().take(16).skip(start) {
        *c = (*c * DEQUANT4_SCALE[rem][class4(i)]) << per;
    }
}

/// 8x8 反量化 (平坦缩放矩阵, LevelScale8x8 = 16 * v)
pub fn dequant8x8(coeffs: &mut [i32; 64], qp: i32) {
    let per = qp / 6;
    let rem = (qp % 6) as usize;
    for (i, c) in coeffs.iter_mut().enumerate() {
        let scale = 16 * DEQUANT8_SCALE[rem][class8(i)];
        *c = if per >= 6 {
            (*c * scale) << (per - 6)
        } else {
            (*c * scale + (1 << (5 - per))) >> (6 - per)
        };
    }
}

/// 亮度 DC 反量化 (反 Hadamard 之后)
pub fn dequant_luma_dc(coeffs: &mut [i32; 16], qp: i32) {
    let per = qp / 6;
    let scale = DEQUANT4_SCALE[(qp % 6) as usize][0];
    for c in coeffs.iter_mut() {
        *c = if per >= 2 {
            (*c * scale) << (per - 2)
        } else {
            (*c * scale + (1 << (1 - per))) >> (2 - per)
        };
    }
}

/// 色度 DC 反量化 (反 Hadamard 之后)
pub fn dequant_chroma_dc(coeffs: &mut [i32; 4], qp: i32) {
    let per = qp / 6;
    let scale = DEQUANT4_SCALE[(qp % 6) as usize][0];
    for c in coeffs.iter_mut() {
        *c = ((*c * scale) << per) >> 1;
    }
}

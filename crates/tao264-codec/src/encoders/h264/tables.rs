//! H.264 编码器共享常量表.
//!
//! 扫描顺序、量化/反量化系数、色度 QP 映射、块索引映射与模式决策 lambda.
//! 全部为编译期常量, 可被并行的 slice 任务只读共享.

// ============================================================
// 扫描顺序
// ============================================================

/// 4x4 zigzag 扫描 (帧编码): 扫描位置 -> 光栅索引 (y * 4 + x)
pub const ZIGZAG_4X4: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// 8x8 zigzag 扫描 (帧编码): 扫描位置 -> 光栅索引 (y * 8 + x)
pub const ZIGZAG_8X8: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, //
    12, 19, 26, 33, 40, 48, 41, 34, 27, 20, 13, 6, 7, 14, 21, 28, //
    35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, //
    58, 59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// 亮度 4x4 块编码顺序 -> 光栅索引 (by * 4 + bx)
///
/// 编码顺序按 8x8 分组的 Z 字形: 先 8x8 块, 再块内 2x2.
pub const BLOCK_RASTER: [usize; 16] = [0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15];

/// 光栅索引 -> 亮度 4x4 块编码顺序
pub const RASTER_BLOCK: [usize; 16] = [0, 1, 4, 5, 2, 3, 6, 7, 8, 9, 12, 13, 10, 11, 14, 15];

/// 4x4 光栅索引所属的 8x8 块序号
#[inline]
pub const fn block8_of_raster(raster: usize) -> usize {
    ((raster >> 3) << 1) | ((raster & 3) >> 1)
}

// ============================================================
// 量化参数
// ============================================================

/// QP 上限
pub const QP_MAX: i32 = 51;

/// 色度 QP 映射表: qPI -> QPc
pub const CHROMA_QP_TABLE: [u8; 52] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 29, 30, 31, 32, 32, 33, 34, 34, 35, 35, 36, 36, 37, 37, 37, 38, 38, 38, 39, 39,
    39, 39,
];

/// 由亮度 QP 与偏移得到色度 QP
#[inline]
pub fn chroma_qp(qp: i32, offset: i32) -> i32 {
    i32::from(CHROMA_QP_TABLE[(qp + offset).clamp(0, QP_MAX) as usize])
}

/// 4x4 量化乘数: [qp % 6][位置类别], 类别 0=偶偶, 1=奇偶混合, 2=奇奇
pub const QUANT4_MF: [[i32; 3]; 6] = [
    [13107, 8066, 5243],
    [11916, 7490, 4660],
    [10082, 6554, 4194],
    [9362, 5825, 3647],
    [8192, 5243, 3355],
    [7282, 4559, 2893],
];

/// 4x4 反量化系数 (LevelScale): [qp % 6][位置类别]
pub const DEQUANT4_SCALE: [[i32; 3]; 6] = [
    [10, 13, 16],
    [11, 14, 18],
    [13, 16, 20],
    [14, 18, 23],
    [16, 20, 25],
    [18, 23, 29],
];

/// 8x8 量化乘数: [qp % 6][位置类别 0..6]
pub const QUANT8_MF: [[i32; 6]; 6] = [
    [13107, 11428, 20972, 12222, 16777, 15481],
    [11916, 10826, 19174, 11058, 14980, 14290],
    [10082, 8943, 15978, 9675, 12710, 11985],
    [9362, 8228, 14913, 8931, 11984, 11259],
    [8192, 7346, 13159, 7740, 10486, 9777],
    [7282, 6428, 11570, 6830, 9118, 8640],
];

/// 8x8 反量化系数: [qp % 6][位置类别 0..6]
pub const DEQUANT8_SCALE: [[i32; 6]; 6] = [
    [20, 18, 32, 19, 25, 24],
    [22, 19, 35, 21, 28, 26],
    [26, 23, 42, 24, 33, 31],
    [28, 25, 45, 26, 35, 33],
    [32, 28, 51, 30, 40, 38],
    [36, 32, 58, 34, 46, 43],
];

/// 8x8 块内 (y % 4, x % 4) -> 位置类别
const CLASS8: [usize; 16] = [0, 3, 4, 3, 3, 1, 5, 1, 4, 5, 2, 5, 3, 1, 5, 1];

/// 4x4 光栅位置的量化类别
#[inline]
pub const fn class4(raster: usize) -> usize {
    let x = raster & 1;
    let y = (raster >> 2) & 1;
    x + y
}

/// 8x8 光栅位置的量化类别
#[inline]
pub const fn class8(raster: usize) -> usize {
    CLASS8[((raster >> 3) & 3) * 4 + (raster & 3)]
}

// ============================================================
// CABAC 8x8 残差上下文映射 (帧编码)
// ============================================================

/// significant_coeff_flag 的 8x8 上下文增量: 扫描位置 -> ctxIdxInc
pub const SIG_COEFF_OFFSET_8X8: [u8; 63] = [
    0, 1, 2, 3, 4, 5, 5, 4, 4, 3, 3, 4, 4, 4, 5, 5, //
    4, 4, 4, 4, 3, 3, 6, 7, 7, 7, 8, 9, 10, 9, 8, 7, //
    7, 6, 11, 12, 13, 11, 6, 7, 8, 9, 14, 10, 9, 8, 6, 11, //
    12, 13, 11, 6, 9, 14, 10, 9, 11, 12, 13, 11, 14, 10, 12,
];

/// last_significant_coeff_flag 的 8x8 上下文增量
pub const LAST_COEFF_OFFSET_8X8: [u8; 63] = [
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, //
    2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, //
    3, 3, 3, 3, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, //
    5, 5, 5, 5, 6, 6, 6, 6, 7, 7, 7, 7, 8, 8, 8,
];

// ============================================================
// 模式决策
// ============================================================

/// SAD 域的 lambda, 按 QP 索引
pub const LAMBDA_TAB: [u16; 52] = [
    1, 1, 1, 1, 1, 1, 1, 1, // 0-7
    1, 1, 1, 1, 1, 1, 1, 1, // 8-15
    2, 2, 2, 2, 3, 3, 3, 4, // 16-23
    4, 4, 5, 6, 6, 7, 8, 9, // 24-31
    10, 11, 13, 14, 16, 18, 20, 23, // 32-39
    25, 29, 32, 36, 40, 45, 51, 57, // 40-47
    64, 72, 81, 91, // 48-51
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag_tables_are_permutations() {
        let mut seen4 = [false; 16];
        for &r in &ZIGZAG_4X4 {
            assert!(!seen4[r], "4x4 扫描表存在重复位置 {r}");
            seen4[r] = true;
        }
        let mut seen8 = [false; 64];
        for &r in &ZIGZAG_8X8 {
            assert!(!seen8[r], "8x8 扫描表存在重复位置 {r}");
            seen8[r] = true;
        }
    }

    #[test]
    fn test_block_order_mapping_is_inverse() {
        for blk in 0..16 {
            assert_eq!(RASTER_BLOCK[BLOCK_RASTER[blk]], blk);
        }
        assert_eq!(block8_of_raster(0), 0);
        assert_eq!(block8_of_raster(3), 1);
        assert_eq!(block8_of_raster(9), 2);
        assert_eq!(block8_of_raster(15), 3);
    }

    #[test]
    fn test_quant_classes() {
        assert_eq!(class4(0), 0);
        assert_eq!(class4(1), 1);
        assert_eq!(class4(4), 1);
        assert_eq!(class4(5), 2);
        assert_eq!(class8(0), 0);
        assert_eq!(class8(9), 1);
        assert_eq!(class8(18), 2);
        assert_eq!(class8(1), 3);
        assert_eq!(class8(2), 4);
        assert_eq!(class8(10), 5);
    }

    #[test]
    fn test_chroma_qp_mapping() {
        assert_eq!(chroma_qp(26, 0), 26);
        assert_eq!(chroma_qp(51, 0), 39);
        assert_eq!(chroma_qp(50, 5), 39);
        assert_eq!(chroma_qp(0, -3), 0);
    }
}

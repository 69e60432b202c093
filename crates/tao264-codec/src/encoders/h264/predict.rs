//! H.264 帧内预测 (编码端).
//!
//! 先从重建平面收集边缘样本, 再按模式生成预测块. 预测结果写入独立缓冲区,
//! 以便编码端计算残差; 重建时把反变换残差叠加到同一预测上.

use super::macroblock::{NB_LEFT, NB_TOP, NB_TOPLEFT};

/// Intra16x16 模式
pub const I16_V: u8 = 0;
pub const I16_H: u8 = 1;
pub const I16_DC: u8 = 2;
pub const I16_PLANE: u8 = 3;

/// 色度模式
pub const CHROMA_DC: u8 = 0;
pub const CHROMA_H: u8 = 1;
pub const CHROMA_V: u8 = 2;
pub const CHROMA_PLANE: u8 = 3;

/// Intra4x4 模式
pub const I4_V: i8 = 0;
pub const I4_H: i8 = 1;
pub const I4_DC: i8 = 2;
pub const I4_DDL: i8 = 3;
pub const I4_DDR: i8 = 4;
pub const I4_VR: i8 = 5;
pub const I4_HD: i8 = 6;
pub const I4_VL: i8 = 7;
pub const I4_HU: i8 = 8;

#[inline]
fn clip_pixel(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// N x N 块 (N = 16 或 8) 的边缘样本
#[derive(Debug, Clone, Copy)]
pub struct BlockEdges<const N: usize> {
    pub top: [u8; N],
    pub left: [u8; N],
    pub top_left: u8,
    pub has_top: bool,
    pub has_left: bool,
    pub has_top_left: bool,
}

impl<const N: usize> BlockEdges<N> {
    /// 从平面收集位于 (x0, y0) 的块的边缘, 可用性来自宏块邻居掩码
    pub fn gather(plane: &[u8], stride: usize, x0: usize, y0: usize, avail: u8) -> Self {
        let has_top = avail & NB_TOP != 0;
        let has_left = avail & NB_LEFT != 0;
        let has_top_left = avail & NB_TOPLEFT != 0;
        let mut top = [0u8; N];
        let mut left = [0u8; N];
        if has_top {
            let row = (y0 - 1) * stride + x0;
            top.copy_from_slice(&plane[row..row + N]);
        }
        if has_left {
            for (i, v) in left.iter_mut().enumerate() {
                *v = plane[(y0 + i) * stride + x0 - 1];
            }
        }
        let top_left = if has_top_left {
            plane[(y0 - 1) * stride + x0 - 1]
        } else {
            0
        };
        Self {
            top,
            left,
            top_left,
            has_top,
            has_left,
            has_top_left,
        }
    }

    fn dc(&self) -> u8 {
        let n = N as u32;
        let shift = n.trailing_zeros();
        let sum_t: u32 = self.top.iter().map(|&v| u32::from(v)).sum();
        let sum_l: u32 = self.left.iter().map(|&v| u32::from(v)).sum();
        match (self.has_top, self.has_left) {
            (true, true) => ((sum_t + sum_l + n) >> (shift + 1)) as u8,
            (true, false) => ((sum_t + n / 2) >> shift) as u8,
            (false, true) => ((sum_l + n / 2) >> shift) as u8,
            (false, false) => 128,
        }
    }

    fn plane_params(&self, scale: i32) -> (i32, i32, i32) {
        let half = N / 2;
        let t = |i: isize| -> i32 {
            if i < 0 {
                i32::from(self.top_left)
            } else {
                i32::from(self.top[i as usize])
            }
        };
        let l = |i: isize| -> i32 {
            if i < 0 {
                i32::from(self.top_left)
            } else {
                i32::from(self.left[i as usize])
            }
        };
        let mut h = 0i32;
        let mut v = 0i32;
        for i in 0..half as isize {
            h += (i as i32 + 1) * (t(half as isize + i) - t(half as isize - 2 - i));
            v += (i as i32 + 1) * (l(half as isize + i) - l(half as isize - 2 - i));
        }
        let b = (scale * h + 32) >> 6;
        let c = (scale * v + 32) >> 6;
        let a = 16 * (i32::from(self.left[N - 1]) + i32::from(self.top[N - 1]));
        (a, b, c)
    }
}

/// 16x16 亮度模式在当前边缘下是否可用
pub fn i16x16_mode_available(mode: u8, e: &BlockEdges<16>) -> bool {
    match mode {
        I16_V => e.has_top,
        I16_H => e.has_left,
        I16_DC => true,
        I16_PLANE => e.has_top && e.has_left && e.has_top_left,
        _ => false,
    }
}

/// 色度模式在当前边缘下是否可用
pub fn chroma_mode_available(mode: u8, e: &BlockEdges<8>) -> bool {
    match mode {
        CHROMA_DC => true,
        CHROMA_H => e.has_left,
        CHROMA_V => e.has_top,
        CHROMA_PLANE => e.has_top && e.has_left && e.has_top_left,
        _ => false,
    }
}

/// Intra16x16 亮度预测
pub fn predict_16x16(e: &BlockEdges<16>, mode: u8, out: &mut [u8; 256]) {
    match mode {
        I16_V => {
            for row in out.chunks_exact_mut(16) {
                row.copy_from_slice(&e.top);
            }
        }
        I16_H => {
            for (row, &l) in out.chunks_exact_mut(16).zip(e.left.iter()) {
                row.fill(l);
            }
        }
        I16_PLANE => {
            let (a, b, c) = e.plane_params(5);
            for y in 0..16 {
                for x in 0..16 {
                    out[y * 16 + x] =
                        clip_pixel((a + b * (x as i32 - 7) + c * (y as i32 - 7) + 16) >> 5);
                }
            }
        }
        _ => out.fill(e.dc()),
    }
}

/// 4:2:0 色度 8x8 预测
pub fn predict_chroma(e: &BlockEdges<8>, mode: u8, out: &mut [u8; 64]) {
    match mode {
        CHROMA_H => {
            for (row, &l) in out.chunks_exact_mut(8).zip(e.left.iter()) {
                row.fill(l);
            }
        }
        CHROMA_V => {
            for row in out.chunks_exact_mut(8) {
                row.copy_from_slice(&e.top);
            }
        }
        CHROMA_PLANE => {
            let (a, b, c) = e.plane_params(34);
            for y in 0..8 {
                for x in 0..8 {
                    out[y * 8 + x] =
                        clip_pixel((a + b * (x as i32 - 3) + c * (y as i32 - 3) + 16) >> 5);
                }
            }
        }
        _ => predict_chroma_dc(e, out),
    }
}

/// 色度 DC: 每个 4x4 子块独立求均值
fn predict_chroma_dc(e: &BlockEdges<8>, out: &mut [u8; 64]) {
    let sum = |s: &[u8]| -> u32 { s.iter().map(|&v| u32::from(v)).sum() };
    for by in 0..2 {
        for bx in 0..2 {
            let st = sum(&e.top[bx * 4..bx * 4 + 4]);
            let sl = sum(&e.left[by * 4..by * 4 + 4]);
            let both = (st + sl + 4) >> 3;
            let top = (st + 2) >> 2;
            let left = (sl + 2) >> 2;
            let dc = match (bx, by) {
                // 右上子块优先使用上方样本
                (1, 0) => {
                    if e.has_top {
                        top
                    } else if e.has_left {
                        left
                    } else {
                        128
                    }
                }
                // 左下子块优先使用左侧样本
                (0, 1) => {
                    if e.has_left {
                        left
                    } else if e.has_top {
                        top
                    } else {
                        128
                    }
                }
                _ => match (e.has_top, e.has_left) {
                    (true, true) => both,
                    (true, false) => top,
                    (false, true) => left,
                    (false, false) => 128,
                },
            } as u8;
            for y in 0..4 {
                let row = (by * 4 + y) * 8 + bx * 4;
                out[row..row + 4].fill(dc);
            }
        }
    }
}

/// 4x4 块的边缘样本: 上方 8 个 (含右上), 左侧 4 个, 左上 1 个
#[derive(Debug, Clone, Copy)]
pub struct Edges4 {
    pub top: [u8; 8],
    pub left: [u8; 4],
    pub top_left: u8,
    pub has_top: bool,
    pub has_left: bool,
    pub has_top_left: bool,
}

impl Edges4 {
    /// 收集 4x4 块边缘; 右上不可用时以上方最后一个样本填充
    #[allow(clippy::too_many_arguments)]
    pub fn gather(
        plane: &[u8],
        stride: usize,
        x0: usize,
        y0: usize,
        has_top: bool,
        has_left: bool,
        has_top_left: bool,
        has_top_right: bool,
    ) -> Self {
        let mut top = [0u8; 8];
        let mut left = [0u8; 4];
        if has_top {
            let row = (y0 - 1) * stride + x0;
            top[..4].copy_from_slice(&plane[row..row + 4]);
            if has_top_right {
                top[4..].copy_from_slice(&plane[row + 4..row + 8]);
            } else {
                let last = top[3];
                top[4..].fill(last);
            }
        }
        if has_left {
            for (i, v) in left.iter_mut().enumerate() {
                *v = plane[(y0 + i) * stride + x0 - 1];
            }
        }
        let top_left = if has_top_left {
            plane[(y0 - 1) * stride + x0 - 1]
        } else {
            0
        };
        Self {
            top,
            left,
            top_left,
            has_top,
            has_left,
            has_top_left,
        }
    }
}

/// 4x4 模式在当前边缘下是否可用
pub fn i4x4_mode_available(mode: i8, e: &Edges4) -> bool {
    match mode {
        I4_V | I4_DDL | I4_VL => e.has_top,
        I4_H | I4_HU => e.has_left,
        I4_DC => true,
        I4_DDR | I4_VR | I4_HD => e.has_top && e.has_left && e.has_top_left,
        _ => false,
    }
}

/// Intra4x4 预测
pub fn predict_4x4(e: &Edges4, mode: i8, out: &mut [u8; 16]) {
    // t(-1) 与 l(-1) 均为左上样本
    let t = |i: i32| -> i32 {
        if i < 0 {
            i32::from(e.top_left)
        } else {
            i32::from(e.top[i as usize])
        }
    };
    let l = |i: i32| -> i32 {
        if i < 0 {
            i32::from(e.top_left)
        } else {
            i32::from(e.left[i as usize])
        }
    };
    let f3 = |a: i32, b: i32, c: i32| ((a + 2 * b + c + 2) >> 2) as u8;
    let f2 = |a: i32, b: i32| ((a + b + 1) >> 1) as u8;

    for y in 0..4i32 {
        for x in 0..4i32 {
            let v = match mode {
                I4_V => t(x) as u8,
                I4_H => l(y) as u8,
                I4_DDL => {
                    if x == 3 && y == 3 {
                        ((t(6) + 3 * t(7) + 2) >> 2) as u8
                    } else {
                        f3(t(x + y), t(x + y + 1), t(x + y + 2))
                    }
                }
                I4_DDR => {
                    if x > y {
                        f3(t(x - y - 2), t(x - y - 1), t(x - y))
                    } else if x < y {
                        f3(l(y - x - 2), l(y - x - 1), l(y - x))
                    } else {
                        f3(t(0), t(-1), l(0))
                    }
                }
                I4_VR => {
                    let z = 2 * x - y;
                    if z >= 0 && z & 1 == 0 {
                        f2(t(x - (y >> 1) - 1), t(x - (y >> 1)))
                    } else if z >= 0 {
                        f3(t(x - (y >> 1) - 2), t(x - (y >> 1) - 1), t(x - (y >> 1)))
                    } else if z == -1 {
                        f3(l(0), t(-1), t(0))
                    } else {
                        f3(l(y - 1), l(y - 2), l(y - 3))
                    }
                }
                I4_HD => {
                    let z = 2 * y - x;
                    if z >= 0 && z & 1 == 0 {
                        f2(l(y - (x >> 1) - 1), l(y - (x >> 1)))
                    } else if z >= 0 {
                        f3(l(y - (x >> 1) - 2), l(y - (x >> 1) - 1), l(y - (x >> 1)))
                    } else if z == -1 {
                        f3(l(0), t(-1), t(0))
                    } else {
                        f3(t(x - 1), t(x - 2), t(x - 3))
                    }
                }
                I4_VL => {
                    if y & 1 == 0 {
                        f2(t(x + (y >> 1)), t(x + (y >> 1) + 1))
                    } else {
                        f3(t(x + (y >> 1)), t(x + (y >> 1) + 1), t(x + (y >> 1) + 2))
                    }
                }
                I4_HU => {
                    let z = x + 2 * y;
                    if z > 5 {
                        l(3) as u8
                    } else if z == 5 {
                        ((l(2) + 3 * l(3) + 2) >> 2) as u8
                    } else if z & 1 == 0 {
                        f2(l(y + (x >> 1)), l(y + (x >> 1) + 1))
                    } else {
                        f3(l(y + (x >> 1)), l(y + (x >> 1) + 1), l(y + (x >> 1) + 2))
                    }
                }
                _ => {
                    let st: i32 = (0..4).map(t).sum();
                    let sl: i32 = (0..4).map(l).sum();
                    match (e.has_top, e.has_left) {
                        (true, true) => ((st + sl + 4) >> 3) as u8,
                        (true, false) => ((st + 2) >> 2) as u8,
                        (false, true) => ((sl + 2) >> 2) as u8,
                        (false, false) => 128,
                    }
                }
            };
            out[(y * 4 + x) as usize] = v;
        }
    }
}

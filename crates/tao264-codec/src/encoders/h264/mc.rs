//! 运动补偿.
//!
//! 亮度: 1/4 像素精度, 半像素位置用六抽头滤波 (1, -5, 20, 20, -5, 1),
//! 1/4 像素位置取相邻整/半像素样本的均值.
//! 色度: 1/8 像素精度双线性插值.
//! 参考平面带填充边缘, 越界坐标由 [`Plane::at`] 限制.

use super::frames::Plane;

#[inline]
fn clip_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn avg(a: i32, b: i32) -> i32 {
    (a + b + 1) >> 1
}

#[inline]
fn tap6(v: [i32; 6]) -> i32 {
    v[0] - 5 * v[1] + 20 * v[2] + 20 * v[3] - 5 * v[4] + v[5]
}

/// 半像素插值器, 所有坐标为整像素位置
struct LumaInterp<'a> {
    plane: &'a Plane,
}

impl LumaInterp<'_> {
    #[inline]
    fn g(&self, x: i32, y: i32) -> i32 {
        i32::from(self.plane.at(x, y))
    }

    /// (x, y) 与 (x+1, y) 之间的水平半像素, 未归一化
    #[inline]
    fn b1(&self, x: i32, y: i32) -> i32 {
        tap6([
            self.g(x - 2, y),
            self.g(x - 1, y),
            self.g(x, y),
            self.g(x + 1, y),
            self.g(x + 2, y),
            self.g(x + 3, y),
        ])
    }

    #[inline]
    fn b(&self, x: i32, y: i32) -> i32 {
        i32::from(clip_u8((self.b1(x, y) + 16) >> 5))
    }

    /// (x, y) 与 (x, y+1) 之间的垂直半像素
    #[inline]
    fn h(&self, x: i32, y: i32) -> i32 {
        let v = tap6([
            self.g(x, y - 2),
            self.g(x, y - 1),
            self.g(x, y),
            self.g(x, y + 1),
            self.g(x, y + 2),
            self.g(x, y + 3),
        ]);
        i32::from(clip_u8((v + 16) >> 5))
    }

    /// 中心半像素 j
    #[inline]
    fn j(&self, x: i32, y: i32) -> i32 {
        let v = tap6([
            self.b1(x, y - 2),
            self.b1(x, y - 1),
            self.b1(x, y),
            self.b1(x, y + 1),
            self.b1(x, y + 2),
            self.b1(x, y + 3),
        ]);
        i32::from(clip_u8((v + 512) >> 10))
    }

    /// 整像素 (x, y) 右下方分数位置 (fx, fy) 的样本
    fn sample(&self, x: i32, y: i32, fx: i32, fy: i32) -> u8 {
        let v = match (fx, fy) {
            (0, 0) => self.g(x, y),
            (1, 0) => avg(self.g(x, y), self.b(x, y)),
            (2, 0) => self.b(x, y),
            (3, 0) => avg(self.g(x + 1, y), self.b(x, y)),
            (0, 1) => avg(self.g(x, y), self.h(x, y)),
            (0, 2) => self.h(x, y),
            (0, 3) => avg(self.g(x, y + 1), self.h(x, y)),
            (2, 2) => self.j(x, y),
            (1, 2) => avg(self.h(x, y), self.j(x, y)),
            (3, 2) => avg(self.j(x, y), self.h(x + 1, y)),
            (2, 1) => avg(self.b(x, y), self.j(x, y)),
            (2, 3) => avg(self.j(x, y), self.b(x, y + 1)),
            (1, 1) => avg(self.b(x, y), self.h(x, y)),
            (3, 1) => avg(self.b(x, y), self.h(x + 1, y)),
            (1, 3) => avg(self.h(x, y), self.b(x, y + 1)),
            _ => avg(self.h(x + 1, y), self.b(x, y + 1)),
        };
        v as u8
    }
}

/// 亮度运动补偿: 预测位于 (x, y) 的 `w x h` 块, `mv` 以 1/4 像素为单位
#[allow(clippy::too_many_arguments)]
pub fn mc_luma(plane: &Plane, x: i32, y: i32, mv: [i16; 2], w: usize, h: usize, dst: &mut [u8], dst_stride: usize) {
    let interp = LumaInterp { plane };
    let (mvx, mvy) = (i32::from(mv[0]), i32::from(mv[1]));
    let (ix, iy) = (x + (mvx >> 2), y + (mvy >> 2));
    let (fx, fy) = (mvx & 3, mvy & 3);
    for row in 0..h {
        let out = &mut dst[row * dst_stride..row * dst_stride + w];
        for (col, v) in out.iter_mut().enumerate() {
            *v = interp.sample(ix + col as i32, iy + row as i32, fx, fy);
        }
    }
}

/// 色度运动补偿: (x, y) 为色度坐标, `mv` 为亮度 1/4 像素矢量 (即色度 1/8 像素)
#[allow(clippy::too_many_arguments)]
pub fn mc_chroma(plane: &Plane, x: i32, y: i32, mv: [i16; 2], w: usize, h: usize, dst: &mut [u8], dst_stride: usize) {
    let (mvx, mvy) = (i32::from(mv[0]), i32::from(mv[1]));
    let (ix, iy) = (x + (mvx >> 3), y + (mvy >> 3));
    let (fx, fy) = (mvx & 7, mvy & 7);
    let wa = (8 - fx) * (8 - fy);
    let wb = fx * (8 - fy);
    let wc = (8 - fx) * fy;
    let wd = fx * fy;
    for row in 0..h {
        let py = iy + row as i32;
        for col in 0..w {
            let px = ix + col as i32;
            let a = i32::from(plane.at(px, py));
            let b = i32::from(plane.at(px + 1, py));
            let c = i32::from(plane.at(px, py + 1));
            let d = i32::from(plane.at(px + 1, py + 1));
            dst[row * dst_stride + col] = ((wa * a + wb * b + wc * c + wd * d + 32) >> 6) as u8;
        }
    }
}

/// 双向预测默认平均
pub fn avg_bipred(a: &[u8], b: &[u8], out: &mut [u8]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = avg(i32::from(x), i32::from(y)) as u8;
    }
}

/// 隐式加权双向预测 (logWD = 5, 无偏移)
pub fn weighted_bipred(a: &[u8], b: &[u8], w0: i32, w1: i32, out: &mut [u8]) {
    for ((o, &x), &y) in out.iter_mut().zip(a).zip(b) {
        *o = clip_u8((i32::from(x) * w0 + i32::from(y) * w1 + 32) >> 6);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_plane() -> Plane {
        let mut plane = Plane::new(16, 16, 8);
        for y in 0..16 {
            for (x, v) in plane.row_mut(y).iter_mut().enumerate() {
                *v = (x * 10 + y) as u8;
            }
        }
        plane.extend_edges();
        plane
    }

    #[test]
    fn test_integer_mv_copies_block() {
        let plane = ramp_plane();
        let mut out = [0u8; 16];
        mc_luma(&plane, 4, 4, [8, -4], 4, 4, &mut out, 4);
        // (4+2, 4-1) 起的 4x4 块
        assert_eq!(out[0], (6 * 10 + 3) as u8);
        assert_eq!(out[5], (7 * 10 + 4) as u8);
    }

    #[test]
    fn test_half_pel_on_flat_plane_is_identity() {
        let mut plane = Plane::new(16, 16, 8);
        plane.data.fill(99);
        let mut out = [0u8; 64];
        for mv in [[2, 0], [0, 2], [2, 2], [1, 3], [3, 1], [-5, 7]] {
            mc_luma(&plane, 0, 0, mv, 8, 8, &mut out, 8);
            assert!(out.iter().all(|&v| v == 99), "mv {:?} 平坦区域插值应保持不变", mv);
        }
    }

    #[test]
    fn test_half_pel_six_tap_value() {
        // 水平线性斜坡上半像素等于两侧平均
        let plane = ramp_plane();
        let mut out = [0u8; 1];
        mc_luma(&plane, 5, 5, [2, 0], 1, 1, &mut out, 1);
        assert_eq!(out[0], 60, "(50+5 + 60+5)/2 = 60");
        // 四分之一位置取整像素与半像素的均值
        mc_luma(&plane, 5, 5, [1, 0], 1, 1, &mut out, 1);
        assert_eq!(out[0], 58);
    }

    #[test]
    fn test_chroma_bilinear() {
        let mut plane = Plane::new(8, 8, 4);
        for y in 0..8 {
            for (x, v) in plane.row_mut(y).iter_mut().enumerate() {
                *v = (x * 8) as u8;
            }
        }
        plane.extend_edges();
        let mut out = [0u8; 1];
        mc_chroma(&plane, 2, 2, [4, 0], 1, 1, &mut out, 1);
        assert_eq!(out[0], 20, "半个色度像素");
        mc_chroma(&plane, 2, 2, [8, 8], 1, 1, &mut out, 1);
        assert_eq!(out[0], 24);
    }

    #[test]
    fn test_bipred_helpers() {
        let mut out = [0u8; 2];
        avg_bipred(&[10, 255], &[11, 254], &mut out);
        assert_eq!(out, [11, 255]);
        weighted_bipred(&[100, 200], &[200, 100], 32, 32, &mut out);
        assert_eq!(out, [150, 150]);
        weighted_bipred(&[100, 0], &[200, 255], 16, 48, &mut out);
        assert_eq!(out, [175, 191]);
    }
}

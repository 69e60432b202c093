//! 像素格式定义.
//!
//! 编码器可接收的输入像素格式. 所有格式在进入编码核心前
//! 都会被色彩空间转换协作者统一为 YUV 4:2:0 平面格式.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 未指定
    None,

    // ========================
    // YUV 4:2:0
    // ========================
    /// YUV 4:2:0 平面格式 (I420), 编码核心的工作格式
    Yuv420p,
    /// YVU 4:2:0 平面格式 (V 平面在 U 平面之前)
    Yv12,
    /// NV12: Y 平面 + UV 交错
    Nv12,
    /// NV21: Y 平面 + VU 交错
    Nv21,

    // ========================
    // RGB 打包格式
    // ========================
    /// RGB 各 8 位, 打包
    Rgb24,
    /// BGR 各 8 位, 打包
    Bgr24,
    /// RGBA 各 8 位, 打包
    Rgba,
    /// BGRA 各 8 位, 打包
    Bgra,
}

impl PixelFormat {
    /// 是否为 YUV 4:2:0 系列 (含半平面)
    pub const fn is_yuv420(&self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yv12 | Self::Nv12 | Self::Nv21)
    }

    /// 打包 RGB 格式每像素字节数, 非 RGB 返回 0
    pub const fn rgb_bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Rgba | Self::Bgra => 4,
            _ => 0,
        }
    }

    /// 平面数量
    pub const fn plane_count(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Yuv420p | Self::Yv12 => 3,
            Self::Nv12 | Self::Nv21 => 2,
            Self::Rgb24 | Self::Bgr24 | Self::Rgba | Self::Bgra => 1,
        }
    }

    /// 计算指定平面每行的字节数 (紧凑排列时)
    pub fn plane_linesize(&self, plane: usize, width: u32) -> Option<usize> {
        if plane >= self.plane_count() as usize {
            return None;
        }
        let w = width as usize;
        Some(match self {
            Self::Yuv420p | Self::Yv12 => {
                if plane == 0 {
                    w
                } else {
                    w.div_ceil(2)
                }
            }
            Self::Nv12 | Self::Nv21 => {
                if plane == 0 {
                    w
                } else {
                    w.div_ceil(2) * 2
                }
            }
            _ => w * self.rgb_bytes_per_pixel(),
        })
    }

    /// 计算指定平面的行数
    pub fn plane_height(&self, plane: usize, height: u32) -> Option<usize> {
        if plane >= self.plane_count() as usize {
            return None;
        }
        let h = height as usize;
        Some(if plane > 0 && self.is_yuv420() {
            h.div_ceil(2)
        } else {
            h
        })
    }

    /// 计算整帧的字节数
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        if *self == Self::None {
            return None;
        }
        let mut total = 0usize;
        for plane in 0..self.plane_count() as usize {
            total += self.plane_linesize(plane, width)? * self.plane_height(plane, height)?;
        }
        Some(total)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Yuv420p => "yuv420p",
            Self::Yv12 => "yv12",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        };
        write!(f, "{name}")
    }
}

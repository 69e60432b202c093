//! 输入帧色彩空间转换.
//!
//! 把各种输入像素格式转换为编码器内部的 YUV 4:2:0 帧存储.
//! 目标平面按宏块对齐, 超出输入尺寸的部分复制最后一行/列, 然后填充边缘.
//!
//! RGB 输入使用 BT.601 有限范围定点矩阵:
//! ```text
//! Y  = ( 77 * R + 150 * G +  29 * B + 128) >> 8
//! Cb = (-43 * R -  85 * G + 128 * B + 128) >> 8 + 128
//! Cr = (128 * R - 107 * G -  21 * B + 128) >> 8 + 128
//! ```

use tao264_core::{PixelFormat, TaoError, TaoResult};

use super::frames::{Plane, YuvPlanes};
use crate::frame::VideoFrame;

const Y_R: i32 = 77;
const Y_G: i32 = 150;
const Y_B: i32 = 29;
const CB_R: i32 = -43;
const CB_G: i32 = -85;
const CB_B: i32 = 128;
const CR_R: i32 = 128;
const CR_G: i32 = -107;
const CR_B: i32 = -21;

/// 色彩空间转换接口
pub trait ColorspaceConverter: Send + Sync {
    /// 把 `frame` 转换进 `dst` (宏块对齐的 4:2:0 存储)
    fn convert(&self, frame: &VideoFrame, dst: &mut YuvPlanes) -> TaoResult<()>;
}

/// 默认 BT.601 转换器
#[derive(Debug, Clone, Copy, Default)]
pub struct Bt601Converter;

/// 是否支持该输入格式
pub fn is_input_supported(format: PixelFormat) -> bool {
    format.is_yuv420() || format.rgb_bytes_per_pixel() > 0
}

impl ColorspaceConverter for Bt601Converter {
    fn convert(&self, frame: &VideoFrame, dst: &mut YuvPlanes) -> TaoResult<()> {
        check_frame(frame)?;
        let (w, h) = (frame.width as usize, frame.height as usize);
        if dst.planes[0].width < w || dst.planes[0].height < h {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: 输入帧 {}x{} 超出编码尺寸 {}x{}",
                w, h, dst.planes[0].width, dst.planes[0].height
            )));
        }
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

        match frame.pixel_format {
            PixelFormat::Yuv420p | PixelFormat::Yv12 => {
                let (u, v) = if frame.pixel_format == PixelFormat::Yv12 { (2, 1) } else { (1, 2) };
                copy_plane(&frame.data[0], frame.linesize[0], w, h, &mut dst.planes[0]);
                copy_plane(&frame.data[u], frame.linesize[u], cw, ch, &mut dst.planes[1]);
                copy_plane(&frame.data[v], frame.linesize[v], cw, ch, &mut dst.planes[2]);
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                copy_plane(&frame.data[0], frame.linesize[0], w, h, &mut dst.planes[0]);
                let swap = frame.pixel_format == PixelFormat::Nv21;
                let [_, u_plane, v_plane] = &mut dst.planes;
                let (u_plane, v_plane) = if swap { (v_plane, u_plane) } else { (u_plane, v_plane) };
                let stride = frame.linesize[1];
                for y in 0..ch {
                    let src = &frame.data[1][y * stride..y * stride + 2 * cw];
                    let (u_row, v_row) = (u_plane.row_mut(y), v_plane.row_mut(y));
                    for x in 0..cw {
                        u_row[x] = src[2 * x];
                        v_row[x] = src[2 * x + 1];
                    }
                }
            }
            PixelFormat::Rgb24 | PixelFormat::Rgba => rgb_to_yuv(frame, [0, 1, 2], dst),
            PixelFormat::Bgr24 | PixelFormat::Bgra => rgb_to_yuv(frame, [2, 1, 0], dst),
            _ => {
                return Err(TaoError::Unsupported(format!(
                    "H264Enc: 不支持的输入像素格式 {}",
                    frame.pixel_format
                )));
            }
        }

        fill_margin(&mut dst.planes[0], w, h);
        fill_margin(&mut dst.planes[1], cw, ch);
        fill_margin(&mut dst.planes[2], cw, ch);
        dst.extend_edges();
        Ok(())
    }
}

/// 检查各平面的行宽与数据长度
fn check_frame(frame: &VideoFrame) -> TaoResult<()> {
    let format = frame.pixel_format;
    if !is_input_supported(format) {
        return Err(TaoError::Unsupported(format!("H264Enc: 不支持的输入像素格式 {}", format)));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(TaoError::InvalidArgument("H264Enc: 输入帧尺寸为 0".into()));
    }
    let planes = format.plane_count() as usize;
    if frame.data.len() < planes || frame.linesize.len() < planes {
        return Err(TaoError::InvalidData(format!(
            "H264Enc: {} 需要 {} 个平面, 实际 {}",
            format,
            planes,
            frame.data.len()
        )));
    }
    for p in 0..planes {
        let (Some(row_bytes), Some(rows)) = (
            format.plane_linesize(p, frame.width),
            format.plane_height(p, frame.height),
        ) else {
            continue;
        };
        let stride = frame.linesize[p];
        if stride < row_bytes {
            return Err(TaoError::InvalidData(format!(
                "H264Enc: 平面 {} 行宽 {} 小于 {}",
                p, stride, row_bytes
            )));
        }
        let needed = stride * (rows - 1) + row_bytes;
        if frame.data[p].len() < needed {
            return Err(TaoError::InvalidData(format!(
                "H264Enc: 平面 {} 数据不足: {} < {}",
                p,
                frame.data[p].len(),
                needed
            )));
        }
    }
    Ok(())
}

fn copy_plane(src: &[u8], stride: usize, w: usize, h: usize, dst: &mut Plane) {
    for y in 0..h {
        dst.row_mut(y)[..w].copy_from_slice(&src[y * stride..y * stride + w]);
    }
}

/// 把可见区域 `w x h` 之外的部分用最后一列/行填充
fn fill_margin(plane: &mut Plane, w: usize, h: usize) {
    let (pw, ph) = (plane.width, plane.height);
    if w < pw {
        for y in 0..h {
            let row = plane.row_mut(y);
            let last = row[w - 1];
            row[w..].fill(last);
        }
    }
    if h < ph {
        let start = plane.index(0, h - 1);
        let row: Vec<u8> = plane.data[start..start + pw].to_vec();
        for y in h..ph {
            plane.row_mut(y).copy_from_slice(&row);
        }
    }
}

/// 打包 RGB 转 YUV 4:2:0, `order` 为 R/G/B 在像素内的字节偏移
fn rgb_to_yuv(frame: &VideoFrame, order: [usize; 3], dst: &mut YuvPlanes) {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let bpp = frame.pixel_format.rgb_bytes_per_pixel();
    let stride = frame.linesize[0];
    let data = &frame.data[0];
    let pixel = |x: usize, y: usize| {
        let off = y * stride + x * bpp;
        [
            i32::from(data[off + order[0]]),
            i32::from(data[off + order[1]]),
            i32::from(data[off + order[2]]),
        ]
    };

    let luma = &mut dst.planes[0];
    for y in 0..h {
        let row = luma.row_mut(y);
        for (x, out) in row.iter_mut().take(w).enumerate() {
            let [r, g, b] = pixel(x, y);
            *out = ((Y_R * r + Y_G * g + Y_B * b + 128) >> 8).clamp(0, 255) as u8;
        }
    }

    let [_, u_plane, v_plane] = &mut dst.planes;
    for cy in 0..h.div_ceil(2) {
        for cx in 0..w.div_ceil(2) {
            let mut sum = [0i32; 3];
            let mut count = 0;
            for y in cy * 2..(cy * 2 + 2).min(h) {
                for x in cx * 2..(cx * 2 + 2).min(w) {
                    let p = pixel(x, y);
                    for c in 0..3 {
                        sum[c] += p[c];
                    }
                    count += 1;
                }
            }
            let [r, g, b] = sum.map(|s| s / count);
            let cb = ((CB_R * r + CB_G * g + CB_B * b + 128) >> 8) + 128;
            let cr = ((CR_R * r + CR_G * g + CR_B * b + 128) >> 8) + 128;
            u_plane.row_mut(cy)[cx] = cb.clamp(0, 255) as u8;
            v_plane.row_mut(cy)[cx] = cr.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_rgb(format: PixelFormat, w: u32, h: u32, rgb: [u8; 3]) -> VideoFrame {
        let mut frame = VideoFrame::alloc(w, h, format);
        let bpp = format.rgb_bytes_per_pixel();
        let order = if matches!(format, PixelFormat::Bgr24 | PixelFormat::Bgra) {
            [2, 1, 0]
        } else {
            [0, 1, 2]
        };
        for px in frame.data[0].chunks_mut(bpp) {
            for c in 0..3 {
                px[order[c]] = rgb[c];
            }
        }
        frame
    }

    #[test]
    fn test_rgb24_to_yuv420p_纯红() {
        let frame = solid_rgb(PixelFormat::Rgb24, 16, 16, [255, 0, 0]);
        let mut dst = YuvPlanes::new(16, 16);
        Bt601Converter.convert(&frame, &mut dst).unwrap();
        assert_eq!(dst.planes[0].row(0)[0], 77);
        assert_eq!(dst.planes[1].row(0)[0], 85);
        assert_eq!(dst.planes[2].row(0)[0], 255);
    }

    #[test]
    fn test_packed_rgb_orders_agree() {
        let color = [30, 160, 220];
        let mut results = Vec::new();
        for format in [PixelFormat::Rgb24, PixelFormat::Bgr24, PixelFormat::Rgba, PixelFormat::Bgra] {
            let frame = solid_rgb(format, 16, 16, color);
            let mut dst = YuvPlanes::new(16, 16);
            Bt601Converter.convert(&frame, &mut dst).unwrap();
            results.push((dst.planes[0].row(3)[3], dst.planes[1].row(3)[3], dst.planes[2].row(3)[3]));
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]), "{:?}", results);
    }

    #[test]
    fn test_nv21_swaps_chroma() {
        let mut frame = VideoFrame::alloc(16, 16, PixelFormat::Nv21);
        for pair in frame.data[1].chunks_mut(2) {
            pair[0] = 200; // V
            pair[1] = 50; // U
        }
        let mut dst = YuvPlanes::new(16, 16);
        Bt601Converter.convert(&frame, &mut dst).unwrap();
        assert_eq!(dst.planes[1].row(7)[7], 50);
        assert_eq!(dst.planes[2].row(7)[7], 200);
    }

    #[test]
    fn test_unaligned_size_replicates_edges() {
        let mut frame = VideoFrame::alloc(18, 17, PixelFormat::Yuv420p);
        for y in 0..17 {
            for x in 0..18 {
                frame.data[0][y * 18 + x] = (x + y) as u8;
            }
        }
        let mut dst = YuvPlanes::new(32, 32);
        Bt601Converter.convert(&frame, &mut dst).unwrap();
        let luma = &dst.planes[0];
        assert_eq!(luma.row(0)[31], 17, "右侧复制最后一列");
        assert_eq!(luma.row(31)[0], 16, "下方复制最后一行");
        assert_eq!(luma.at(-5, 0), 0, "填充区域");
    }

    #[test]
    fn test_rejects_short_planes() {
        let mut frame = VideoFrame::alloc(16, 16, PixelFormat::Yuv420p);
        frame.data[2].truncate(10);
        let mut dst = YuvPlanes::new(16, 16);
        assert!(matches!(
            Bt601Converter.convert(&frame, &mut dst),
            Err(TaoError::InvalidData(_))
        ));
        let frame = VideoFrame::alloc(32, 16, PixelFormat::Yuv420p);
        assert!(matches!(
            Bt601Converter.convert(&frame, &mut dst),
            Err(TaoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unspecified_format_is_unsupported() {
        let frame = VideoFrame::alloc(16, 16, PixelFormat::None);
        let mut dst = YuvPlanes::new(16, 16);
        assert!(!is_input_supported(PixelFormat::None));
        assert!(matches!(
            Bt601Converter.convert(&frame, &mut dst),
            Err(TaoError::Unsupported(_))
        ));
    }
}

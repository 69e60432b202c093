//! 编码统计: 每 slice、每帧与整个会话.

use log::info;

use super::frames::{FrameType, Plane};
use super::macroblock::MbType;

/// 一个 slice 的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceStats {
    /// 宏块头部 (类型、预测信息、CBP、QP 差值) 比特数
    pub header_bits: u64,
    /// 残差比特数
    pub texture_bits: u64,
    pub mb_types: [u32; MbType::COUNT],
    /// 选中模式的失真估计之和
    pub intra_cost: u64,
    pub inter_cost: u64,
    pub qp_sum: u64,
    pub mb_count: u32,
}

impl SliceStats {
    pub fn merge(&mut self, other: &SliceStats) {
        self.header_bits += other.header_bits;
        self.texture_bits += other.texture_bits;
        for (a, b) in self.mb_types.iter_mut().zip(&other.mb_types) {
            *a += b;
        }
        self.intra_cost += other.intra_cost;
        self.inter_cost += other.inter_cost;
        self.qp_sum += other.qp_sum;
        self.mb_count += other.mb_count;
    }
}

/// 一帧的统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub frame_type: Option<FrameType>,
    pub qp: u8,
    /// 整个访问单元的比特数 (含参数集与 slice 头)
    pub bits: u64,
    pub mb: SliceStats,
    /// Y, U, V 的 PSNR (dB)
    pub psnr: Option<[f64; 3]>,
}

impl FrameStats {
    pub fn average_qp(&self) -> f64 {
        if self.mb.mb_count == 0 {
            f64::from(self.qp)
        } else {
            self.mb.qp_sum as f64 / f64::from(self.mb.mb_count)
        }
    }

    /// 每宏块的平均失真估计
    pub fn average_distortion(&self) -> f64 {
        if self.mb.mb_count == 0 {
            return 0.0;
        }
        (self.mb.intra_cost + self.mb.inter_cost) as f64 / f64::from(self.mb.mb_count)
    }
}

/// 由平方误差和计算 PSNR, 完全一致时上限 100 dB
pub fn psnr(sse: u64, samples: u64) -> f64 {
    if sse == 0 || samples == 0 {
        return 100.0;
    }
    let mse = sse as f64 / samples as f64;
    (10.0 * (255.0 * 255.0 / mse).log10()).min(100.0)
}

/// 三个平面在可见区域 (`width` x `height` 的亮度及对应 4:2:0 色度) 上的 PSNR
///
/// 宏块对齐带来的右侧与底部扩展样本不计入.
pub fn planes_psnr(source: &[Plane; 3], recon: &[Plane; 3], width: usize, height: usize) -> [f64; 3] {
    std::array::from_fn(|i| {
        let (w, h) = if i == 0 {
            (width, height)
        } else {
            (width.div_ceil(2), height.div_ceil(2))
        };
        let (w, h) = (w.min(source[i].width), h.min(source[i].height));
        psnr(source[i].sse_region(&recon[i], w, h), (w * h) as u64)
    })
}

/// 一种帧类型的累计统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTotals {
    pub frames: u64,
    pub bits: u64,
    pub qp_sum: f64,
    pub mb: SliceStats,
    pub psnr_sum: [f64; 3],
    pub psnr_frames: u64,
}

/// 会话累计统计, 按 I/P/B 分类
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderStats {
    pub totals: [TypeTotals; 3],
}

fn type_slot(t: FrameType) -> usize {
    match t {
        FrameType::Idr => 0,
        FrameType::P => 1,
        FrameType::B => 2,
    }
}

impl EncoderStats {
    pub fn record(&mut self, frame: &FrameStats) {
        let Some(t) = frame.frame_type else {
            return;
        };
        let totals = &mut self.totals[type_slot(t)];
        totals.frames += 1;
        totals.bits += frame.bits;
        totals.qp_sum += frame.average_qp();
        totals.mb.merge(&frame.mb);
        if let Some(p) = frame.psnr {
            for (sum, v) in totals.psnr_sum.iter_mut().zip(p) {
                *sum += v;
            }
            totals.psnr_frames += 1;
        }
    }

    pub fn frames(&self) -> u64 {
        self.totals.iter().map(|t| t.frames).sum()
    }

    pub fn bits(&self) -> u64 {
        self.totals.iter().map(|t| t.bits).sum()
    }

    /// 以 info 级别输出会话汇总
    pub fn log_summary(&self) {
        for (name, t) in ["I", "P", "B"].iter().zip(&self.totals) {
            if t.frames == 0 {
                continue;
            }
            let n = t.frames as f64;
            let mut line = format!(
                "H264Enc: 帧 {}: {} 帧, 平均 QP {:.2}, 平均大小 {:.0} 字节",
                name,
                t.frames,
                t.qp_sum / n,
                t.bits as f64 / n / 8.0
            );
            if t.psnr_frames > 0 {
                let k = t.psnr_frames as f64;
                line.push_str(&format!(
                    ", PSNR Y:{:.2} U:{:.2} V:{:.2}",
                    t.psnr_sum[0] / k,
                    t.psnr_sum[1] / k,
                    t.psnr_sum[2] / k
                ));
            }
            info!("{}", line);
            let total_mbs = t.mb.mb_count.max(1) as f64;
            let hist: Vec<String> = t
                .mb
                .mb_types
                .iter()
                .enumerate()
                .filter(|(_, c)| **c > 0)
                .map(|(i, c)| format!("{}:{:.1}%", MB_TYPE_NAMES[i], f64::from(*c) * 100.0 / total_mbs))
                .collect();
            info!(
                "H264Enc: 帧 {} 宏块 {}, 头部 {:.1}%",
                name,
                hist.join(" "),
                t.mb.header_bits as f64 * 100.0 / (t.mb.header_bits + t.mb.texture_bits).max(1) as f64
            );
        }
        info!(
            "H264Enc: 共编码 {} 帧, {} 字节",
            self.frames(),
            self.bits() / 8
        );
    }
}

const MB_TYPE_NAMES: [&str; MbType::COUNT] = [
    "I4x4", "I16x16", "P16x16", "P16x8", "P8x16", "P8x8", "PSkip", "BDirect", "BL0", "BL1", "BBi", "BSkip",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psnr_values() {
        assert_eq!(psnr(0, 100), 100.0);
        // MSE = 1 时约 48.13 dB
        let v = psnr(256, 256);
        assert!((v - 48.13).abs() < 0.01, "psnr = {v}");
    }

    #[test]
    fn test_psnr_ignores_alignment_padding() {
        // 34x18 输入对齐到 48x32, 扩展区域写入与源不同的样本
        let make = |fill: u8| -> [Plane; 3] {
            std::array::from_fn(|i| {
                let (w, h) = if i == 0 { (48, 32) } else { (24, 16) };
                let mut plane = Plane::new(w, h, 0);
                plane.data.fill(fill);
                plane
            })
        };
        let source = make(100);
        let mut recon = make(100);
        for (i, plane) in recon.iter_mut().enumerate() {
            let (vw, vh) = if i == 0 { (34, 18) } else { (17, 9) };
            for y in 0..plane.height {
                for (x, v) in plane.row_mut(y).iter_mut().enumerate() {
                    if x >= vw || y >= vh {
                        *v = 0;
                    }
                }
            }
        }
        assert_eq!(planes_psnr(&source, &recon, 34, 18), [100.0; 3], "扩展区域不应影响 PSNR");

        recon[0].row_mut(17)[33] = 116;
        let psnr_y = planes_psnr(&source, &recon, 34, 18)[0];
        let expected = psnr(256, 34 * 18);
        assert!((psnr_y - expected).abs() < 1e-9, "亮度按可见样本数平均: {psnr_y} vs {expected}");
    }

    #[test]
    fn test_totals_by_frame_type() {
        let mut stats = EncoderStats::default();
        let mut mb = SliceStats {
            mb_count: 4,
            qp_sum: 100,
            ..Default::default()
        };
        mb.mb_types[MbType::I16x16.index()] = 4;
        stats.record(&FrameStats {
            frame_type: Some(FrameType::Idr),
            qp: 25,
            bits: 800,
            mb: mb.clone(),
            psnr: Some([40.0, 42.0, 43.0]),
        });
        stats.record(&FrameStats {
            frame_type: Some(FrameType::B),
            qp: 30,
            bits: 80,
            mb,
            psnr: None,
        });
        assert_eq!(stats.frames(), 2);
        assert_eq!(stats.bits(), 880);
        assert_eq!(stats.totals[0].qp_sum, 25.0);
        assert_eq!(stats.totals[0].psnr_frames, 1);
        assert_eq!(stats.totals[2].mb.mb_types[MbType::I16x16.index()], 4);
        assert_eq!(stats.totals[1].frames, 0);
    }

    #[test]
    fn test_mb_type_names_match_order() {
        assert_eq!(MB_TYPE_NAMES[MbType::PSkip.index()], "PSkip");
        assert_eq!(MB_TYPE_NAMES[MbType::BSkip.index()], "BSkip");
    }
}

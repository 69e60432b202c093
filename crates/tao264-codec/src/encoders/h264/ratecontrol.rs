//! 码率控制.
//!
//! 每帧编码前由 [`RateControl::next_qp`] 给出帧 QP, 编码后通过
//! [`RateControl::report_frame_stats`] 回报实际比特数与宏块统计.
//! 可变 QP 模式下, [`adaptive_qp_plan`] 在帧 QP 的基础上按宏块亮度活跃度给出逐宏块 QP.

use log::debug;

use super::config::H264EncoderConfig;
use super::frames::{FrameType, Plane};
use super::macroblock::MbType;

/// 相邻两帧基准 QP 的最大变化 (不区分帧类型)
const MAX_QP_STEP: f64 = 4.0;
/// 模型系数的平滑权重 (新观测所占比例)
const MODEL_DECAY: f64 = 0.4;
/// 自适应量化强度
const AQ_STRENGTH: f64 = 1.0;
/// 自适应量化的最大偏移
const AQ_MAX_OFFSET: i32 = 6;

/// 编码下一帧前提供给码率控制的信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RcFrameInfo {
    pub frame_type: FrameType,
    /// 前瞻估计的帧复杂度 (低分辨率 SATD 之和)
    pub complexity: u64,
}

/// 码率控制接口
pub trait RateControl: Send {
    /// 下一帧的 QP
    fn next_qp(&mut self, info: &RcFrameInfo) -> u8;

    /// 回报刚完成编码的一帧
    fn report_frame_stats(
        &mut self,
        frame_type: FrameType,
        bits_used: u64,
        mb_type_histogram: &[u32; MbType::COUNT],
        average_distortion: f64,
    );
}

/// I/B 帧相对 P 帧的 QP 偏移
fn type_offsets(config: &H264EncoderConfig) -> (f64, f64) {
    if config.lossless {
        return (0.0, 0.0);
    }
    (
        -(6.0 * f64::from(config.ip_ratio).log2()).round(),
        (6.0 * f64::from(config.pb_ratio).log2()).round(),
    )
}

fn type_offset(frame_type: FrameType, offsets: (f64, f64)) -> f64 {
    match frame_type {
        FrameType::Idr => offsets.0,
        FrameType::P => 0.0,
        FrameType::B => offsets.1,
    }
}

/// 量化步长, QP 每增加 6 翻倍
pub fn qp_to_qstep(qp: f64) -> f64 {
    0.625 * 2f64.powf(qp / 6.0)
}

pub fn qstep_to_qp(qstep: f64) -> f64 {
    6.0 * (qstep / 0.625).log2()
}

// ============================================================
// 恒定 QP
// ============================================================

/// 恒定 QP: P 帧使用配置 QP, I/B 帧按比例偏移
#[derive(Debug, Clone)]
pub struct ConstantQp {
    qp: f64,
    offsets: (f64, f64),
    range: (u8, u8),
}

impl ConstantQp {
    pub fn new(config: &H264EncoderConfig) -> Self {
        Self {
            qp: f64::from(config.qp),
            offsets: type_offsets(config),
            range: (config.qp_min.min(config.qp), config.qp_max.max(config.qp)),
        }
    }
}

impl RateControl for ConstantQp {
    fn next_qp(&mut self, info: &RcFrameInfo) -> u8 {
        let qp = self.qp + type_offset(info.frame_type, self.offsets);
        (qp.round() as i32).clamp(i32::from(self.range.0), i32::from(self.range.1)) as u8
    }

    fn report_frame_stats(&mut self, _: FrameType, _: u64, _: &[u32; MbType::COUNT], _: f64) {}
}

// ============================================================
// 平均码率
// ============================================================

/// 平均码率控制
///
/// 每种帧类型维护一个比特模型 `bits = coef * complexity / qstep`,
/// 用已编码帧的实际比特数平滑更新. 预算偏差按 `rc_buffer` 帧的窗口折算成
/// 本帧目标比特的修正. 去掉类型偏移后的基准 QP 相对上一帧 (任意类型)
/// 的变化不超过 [`MAX_QP_STEP`], 因此 IDR 之后的首个 P/B 帧也不会跳变.
#[derive(Debug, Clone)]
pub struct AbrRateControl {
    bits_per_frame: f64,
    buffer_frames: f64,
    offsets: (f64, f64),
    range: (f64, f64),
    /// 模型系数 [I, P, B]
    coef: [Option<f64>; 3],
    /// 上一帧去掉类型偏移后的基准 QP
    last_base_qp: Option<f64>,
    /// 尚未回报的帧: (类型, QP, 复杂度)
    pending: Option<(FrameType, f64, f64)>,
    initial_qp: f64,
    frames: u64,
    total_bits: u64,
}

fn slot(t: FrameType) -> usize {
    match t {
        FrameType::Idr => 0,
        FrameType::P => 1,
        FrameType::B => 2,
    }
}

impl AbrRateControl {
    /// `bitrate` 为 bit/s, `fps` 为帧率
    pub fn new(config: &H264EncoderConfig, bitrate: u32, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 25.0 };
        Self {
            bits_per_frame: f64::from(bitrate) / fps,
            buffer_frames: f64::from(config.rc_buffer.max(1)),
            offsets: type_offsets(config),
            range: (f64::from(config.qp_min), f64::from(config.qp_max)),
            coef: [None; 3],
            last_base_qp: None,
            pending: None,
            initial_qp: f64::from(config.qp),
            frames: 0,
            total_bits: 0,
        }
    }

    /// 已编码帧数与总比特数
    pub fn totals(&self) -> (u64, u64) {
        (self.frames, self.total_bits)
    }

    /// 预算偏差 (正值表示超支), 以窗口内的总预算归一
    fn overflow(&self) -> f64 {
        let expected = self.frames as f64 * self.bits_per_frame;
        let window = self.buffer_frames * self.bits_per_frame;
        ((self.total_bits as f64 - expected) / window).clamp(-0.5, 0.5)
    }

    /// 模型系数: 优先同类型, 否则借用 P 帧或任一已有的系数
    fn coef_for(&self, t: FrameType) -> Option<f64> {
        self.coef[slot(t)]
            .or(self.coef[slot(FrameType::P)])
            .or_else(|| self.coef.iter().flatten().next().copied())
    }
}

impl RateControl for AbrRateControl {
    fn next_qp(&mut self, info: &RcFrameInfo) -> u8 {
        let t = info.frame_type;
        let offset = type_offset(t, self.offsets);
        let complexity = (info.complexity as f64).max(1.0);

        let qp = match self.coef_for(t) {
            Some(coef) => {
                let target = self.bits_per_frame * (1.0 - self.overflow());
                // 系数为 P 帧等效值, 求出基准 QP 后再加类型偏移
                let base = qstep_to_qp(coef * complexity / target.max(1.0));
                let base = match self.last_base_qp {
                    Some(last) => base.clamp(last - MAX_QP_STEP, last + MAX_QP_STEP),
                    None => base,
                };
                base + offset
            }
            None => self.last_base_qp.unwrap_or(self.initial_qp) + offset,
        };
        let qp = qp.clamp(self.range.0, self.range.1);
        self.last_base_qp = Some(qp - offset);
        self.pending = Some((t, qp, complexity));
        debug!(
            "H264Enc: 码率控制 {:?} 复杂度 {} 偏差 {:.3} -> QP {:.2}",
            t,
            info.complexity,
            self.overflow(),
            qp
        );
        qp.round() as u8
    }

    fn report_frame_stats(
        &mut self,
        frame_type: FrameType,
        bits_used: u64,
        _mb_type_histogram: &[u32; MbType::COUNT],
        _average_distortion: f64,
    ) {
        self.frames += 1;
        self.total_bits += bits_used;
        let Some((t, qp, complexity)) = self.pending.take() else {
            return;
        };
        if t != frame_type {
            return;
        }
        // 折算成 P 帧等效系数: 去掉类型偏移后的步长
        let qstep = qp_to_qstep(qp - type_offset(t, self.offsets));
        let observed = bits_used.max(1) as f64 * qstep / complexity;
        let c = &mut self.coef[slot(t)];
        *c = Some(match *c {
            Some(prev) => prev * (1.0 - MODEL_DECAY) + observed * MODEL_DECAY,
            None => observed,
        });
    }
}

/// 按配置创建码率控制
pub fn create_rate_control(config: &H264EncoderConfig, fps: f64) -> Box<dyn RateControl> {
    match config.bitrate {
        Some(bitrate) if !config.lossless => Box::new(AbrRateControl::new(config, bitrate, fps)),
        _ => Box::new(ConstantQp::new(config)),
    }
}

// ============================================================
// 自适应量化
// ============================================================

/// 宏块亮度方差
fn mb_variance(luma: &Plane, mb_x: usize, mb_y: usize) -> u32 {
    let (mut sum, mut sum_sq) = (0u32, 0u64);
    for y in 0..16 {
        let at = luma.index(mb_x * 16, mb_y * 16 + y);
        for &v in &luma.data[at..at + 16] {
            sum += u32::from(v);
            sum_sq += u64::from(v) * u64::from(v);
        }
    }
    ((sum_sq - u64::from(sum) * u64::from(sum) / 256) / 256) as u32
}

/// 逐宏块 QP: 平坦区域降低 QP, 纹理区域提高 QP
///
/// 偏移为 `AQ_STRENGTH * (log2(方差 + 1) - 帧平均)`, 限制在 ±[`AQ_MAX_OFFSET`] 内.
pub fn adaptive_qp_plan(luma: &Plane, mb_width: usize, mb_height: usize, frame_qp: u8, range: (u8, u8)) -> Vec<u8> {
    let energy: Vec<f64> = (0..mb_height)
        .flat_map(|y| (0..mb_width).map(move |x| (x, y)))
        .map(|(x, y)| f64::from(mb_variance(luma, x, y) + 1).log2())
        .collect();
    if energy.is_empty() {
        return Vec::new();
    }
    let mean = energy.iter().sum::<f64>() / energy.len() as f64;
    energy
        .iter()
        .map(|e| {
            let offset = (AQ_STRENGTH * (e - mean)).round() as i32;
            let qp = i32::from(frame_qp) + offset.clamp(-AQ_MAX_OFFSET, AQ_MAX_OFFSET);
            qp.clamp(i32::from(range.0), i32::from(range.1)) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(frame_type: FrameType, complexity: u64) -> RcFrameInfo {
        RcFrameInfo { frame_type, complexity }
    }

    /// 合成比特模型: bits = k * complexity / qstep
    fn synth_bits(k: f64, complexity: u64, qp: u8) -> u64 {
        (k * complexity as f64 / qp_to_qstep(f64::from(qp))) as u64
    }

    #[test]
    fn test_qstep_doubles_every_six() {
        assert!((qp_to_qstep(4.0) - 1.0).abs() < 0.01);
        assert!((qp_to_qstep(28.0) / qp_to_qstep(22.0) - 2.0).abs() < 1e-9);
        assert!((qstep_to_qp(qp_to_qstep(31.5)) - 31.5).abs() < 1e-9);
    }

    #[test]
    fn test_constant_qp_offsets() {
        let config = H264EncoderConfig::default();
        let mut rc = ConstantQp::new(&config);
        assert_eq!(rc.next_qp(&info(FrameType::P, 0)), 26);
        assert_eq!(rc.next_qp(&info(FrameType::Idr, 0)), 23, "ip_ratio 1.4 -> -3");
        assert_eq!(rc.next_qp(&info(FrameType::B, 0)), 28, "pb_ratio 1.3 -> +2");
    }

    #[test]
    fn test_constant_qp_lossless_is_zero() {
        let mut config = H264EncoderConfig {
            lossless: true,
            ..Default::default()
        };
        config.resolve();
        let mut rc = create_rate_control(&config, 25.0);
        for t in [FrameType::Idr, FrameType::P, FrameType::B] {
            assert_eq!(rc.next_qp(&info(t, 1000)), 0);
        }
    }

    #[test]
    fn test_abr_converges_to_target() {
        let config = H264EncoderConfig {
            qp: 30,
            ..Default::default()
        };
        let fps = 25.0;
        let bitrate = 400_000;
        let mut rc = AbrRateControl::new(&config, bitrate, fps);
        let hist = [0u32; MbType::COUNT];
        let complexity = 50_000;
        let k = 2.0;
        let mut last = 0;
        for _ in 0..120 {
            let qp = rc.next_qp(&info(FrameType::P, complexity));
            let bits = synth_bits(k, complexity, qp);
            rc.report_frame_stats(FrameType::P, bits, &hist, 0.0);
            last = qp;
        }
        let (frames, total) = rc.totals();
        let avg = total as f64 / frames as f64;
        let target = f64::from(bitrate) / fps;
        assert!((avg / target - 1.0).abs() < 0.15, "平均 {avg:.0} 目标 {target:.0}");
        let ideal = qstep_to_qp(k * complexity as f64 / target);
        assert!((f64::from(last) - ideal).abs() <= 2.0, "QP {last} 理想 {ideal:.1}");
    }

    #[test]
    fn test_abr_limits_qp_step() {
        let config = H264EncoderConfig {
            qp: 20,
            ..Default::default()
        };
        let mut rc = AbrRateControl::new(&config, 100_000, 25.0);
        let hist = [0u32; MbType::COUNT];
        let first = rc.next_qp(&info(FrameType::P, 10_000));
        assert_eq!(first, 20, "没有模型时使用配置 QP");
        // 实际比特远超预算, 下一帧 QP 只能上调有限步长
        rc.report_frame_stats(FrameType::P, 10_000_000, &hist, 0.0);
        let second = rc.next_qp(&info(FrameType::P, 10_000));
        assert_eq!(second, 24);
    }

    #[test]
    fn test_abr_first_p_after_idr_is_bounded() {
        let config = H264EncoderConfig::default();
        let mut rc = AbrRateControl::new(&config, 8_000, 25.0);
        let hist = [0u32; MbType::COUNT];
        let idr = rc.next_qp(&info(FrameType::Idr, 40_000));
        assert_eq!(idr, 23);
        // IDR 严重超支, 首个 P 帧借用 IDR 的模型系数
        rc.report_frame_stats(FrameType::Idr, 2_000_000, &hist, 0.0);
        let p = rc.next_qp(&info(FrameType::P, 40_000));
        assert_eq!(p, 30, "基准 QP 从 26 最多上调 4");
        rc.report_frame_stats(FrameType::P, 500_000, &hist, 0.0);
        let b = rc.next_qp(&info(FrameType::B, 40_000));
        assert!(b <= 30 + 4 + 2, "B 帧同样受步长限制: {b}");
    }

    #[test]
    fn test_abr_respects_qp_range() {
        let config = H264EncoderConfig {
            qp: 30,
            qp_min: 20,
            qp_max: 34,
            ..Default::default()
        };
        let mut rc = AbrRateControl::new(&config, 1_000_000_000, 25.0);
        let hist = [0u32; MbType::COUNT];
        let mut qp = 0;
        for _ in 0..20 {
            qp = rc.next_qp(&info(FrameType::P, 1000));
            rc.report_frame_stats(FrameType::P, 10, &hist, 0.0);
        }
        assert_eq!(qp, 20, "预算充足时 QP 降到下限");
    }

    #[test]
    fn test_adaptive_plan_favours_flat_areas() {
        let mut luma = Plane::new(32, 16, 0);
        for y in 0..16 {
            for x in 0..32 {
                let v = if x < 16 { 100 } else if (x + y) % 2 == 0 { 20 } else { 230 };
                luma.row_mut(y)[x] = v;
            }
        }
        let plan = adaptive_qp_plan(&luma, 2, 1, 26, (10, 51));
        assert_eq!(plan.len(), 2);
        assert!(plan[0] < 26 && plan[1] > 26, "plan = {:?}", plan);
        assert!(plan.iter().all(|&q| (20..=32).contains(&q)));
    }
}

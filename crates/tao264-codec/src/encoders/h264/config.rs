//! H.264 编码器配置.

use log::warn;
use tao264_core::{TaoError, TaoResult};

use super::tables::QP_MAX;

/// 工作线程数环境变量
pub const THREADS_ENV: &str = "TAO264_THREADS";

/// B 帧数量决策策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BAdapt {
    /// 固定 B 帧数
    #[default]
    Fixed,
    /// 按前瞻窗口的帧间/帧内代价估计决定 B 帧数, 并检测场景切换
    Adaptive,
}

/// H.264 编码器配置
///
/// 分辨率与像素格式来自 `CodecParameters`, 其余参数都在这里.
#[derive(Debug, Clone, PartialEq)]
pub struct H264EncoderConfig {
    /// 恒定 QP 模式下 P 帧的 QP
    pub qp: u8,
    pub qp_min: u8,
    pub qp_max: u8,
    /// chroma_qp_index_offset
    pub chroma_qp_offset: i8,
    /// I 帧相对 P 帧的量化步长比
    pub ip_ratio: f32,
    /// P 帧相对 B 帧的量化步长比
    pub pb_ratio: f32,
    /// 目标码率 (bit/s), 设置后启用平均码率控制
    pub bitrate: Option<u32>,
    /// 码率控制的平滑窗口 (帧)
    pub rc_buffer: u32,
    /// 最大 IDR 间隔
    pub keyint_max: u32,
    /// 场景切换阈值 (0 关闭)
    pub scenecut_threshold: u32,
    /// 连续 B 帧最大数量
    pub bframes: u32,
    pub b_adapt: BAdapt,
    /// 前瞻窗口 (帧)
    pub lookahead: u32,
    /// P 帧参考帧数
    pub ref_frames: u32,
    /// 每隔多少个 P 帧标记一个长期参考帧 (0 关闭)
    pub long_term_interval: u32,
    /// 每帧 slice 数 (按宏块行均分)
    pub slice_count: u32,
    pub cabac_init_idc: u8,
    /// 帧间宏块允许 8x8 变换 (High profile)
    pub transform_8x8: bool,
    /// 无损模式 (High 4:4:4 Predictive, QP 0 旁路变换)
    pub lossless: bool,
    /// 按宏块亮度活跃度调整 QP
    pub variable_qp: bool,
    /// 隐式加权双向预测
    pub weighted_bipred: bool,
    /// 整像素运动搜索半径
    pub me_range: u32,
    /// 亚像素细化级别: 0 整像素, 1 半像素, 2 四分之一像素
    pub subpel_refine: u8,
    /// Annex B 起始码输出, 否则为 4 字节长度前缀
    pub annexb: bool,
    /// 每个访问单元都重复 SPS/PPS
    pub repeat_headers: bool,
    /// 统计每帧 PSNR
    pub compute_psnr: bool,
    /// slice 并行线程数 (0 表示自动)
    pub threads: usize,
}

impl Default for H264EncoderConfig {
    fn default() -> Self {
        Self {
            qp: 26,
            qp_min: 10,
            qp_max: QP_MAX as u8,
            chroma_qp_offset: 0,
            ip_ratio: 1.4,
            pb_ratio: 1.3,
            bitrate: None,
            rc_buffer: 25,
            keyint_max: 250,
            scenecut_threshold: 40,
            bframes: 2,
            b_adapt: BAdapt::Fixed,
            lookahead: 8,
            ref_frames: 3,
            long_term_interval: 0,
            slice_count: 1,
            cabac_init_idc: 0,
            transform_8x8: true,
            lossless: false,
            variable_qp: false,
            weighted_bipred: true,
            me_range: 16,
            subpel_refine: 2,
            annexb: true,
            repeat_headers: false,
            compute_psnr: false,
            threads: 0,
        }
    }
}

impl H264EncoderConfig {
    /// 检查配置, 不合法时返回 `InvalidArgument`
    pub fn validate(&self) -> TaoResult<()> {
        if i32::from(self.qp) > QP_MAX || self.qp_min > self.qp_max || i32::from(self.qp_max) > QP_MAX {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: QP 超出范围, qp={}, qp_min={}, qp_max={}",
                self.qp, self.qp_min, self.qp_max
            )));
        }
        if !(-12..=12).contains(&self.chroma_qp_offset) {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: chroma_qp_offset 超出范围: {}",
                self.chroma_qp_offset
            )));
        }
        if !(self.ip_ratio > 0.0 && self.pb_ratio > 0.0) {
            return Err(TaoError::InvalidArgument("H264Enc: ip_ratio/pb_ratio 必须为正".into()));
        }
        if self.bitrate == Some(0) {
            return Err(TaoError::InvalidArgument("H264Enc: 目标码率不能为 0".into()));
        }
        if self.keyint_max == 0 {
            return Err(TaoError::InvalidArgument("H264Enc: keyint_max 不能为 0".into()));
        }
        if self.bframes > 16 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: B 帧数量超出范围: {}",
                self.bframes
            )));
        }
        if self.ref_frames == 0 || self.ref_frames > 15 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: 参考帧数量超出范围: {}",
                self.ref_frames
            )));
        }
        if self.slice_count == 0 {
            return Err(TaoError::InvalidArgument("H264Enc: slice 数量不能为 0".into()));
        }
        if self.cabac_init_idc > 2 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: cabac_init_idc 超出范围: {}",
                self.cabac_init_idc
            )));
        }
        if self.subpel_refine > 2 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: subpel_refine 超出范围: {}",
                self.subpel_refine
            )));
        }
        if self.me_range == 0 || self.me_range > 64 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: me_range 超出范围: {}",
                self.me_range
            )));
        }
        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        let Ok(value) = std::env::var(THREADS_ENV) else {
            return;
        };
        match value.trim().parse::<usize>() {
            Ok(threads) => self.threads = threads,
            Err(_) => warn!("H264Enc: 忽略无效的 {THREADS_ENV}={value}"),
        }
    }

    /// 修正与无损模式冲突的选项
    pub fn resolve(&mut self) {
        if self.lossless {
            if self.transform_8x8 || self.variable_qp || self.bitrate.is_some() {
                warn!("H264Enc: 无损模式下关闭 8x8 变换、自适应 QP 与码率控制");
            }
            self.transform_8x8 = false;
            self.variable_qp = false;
            self.bitrate = None;
            self.qp = 0;
            self.qp_min = 0;
        }
        if self.lookahead < self.bframes + 1 {
            self.lookahead = self.bframes + 1;
        }
    }

    /// 序列参考帧上限 (SPS num_ref_frames)
    ///
    /// 有 B 帧时后向锚点帧本身及其参考帧都要保留到 B 帧编码完成.
    pub fn dpb_size(&self) -> u32 {
        let size = if self.bframes > 0 {
            (self.ref_frames + 1).max(2)
        } else {
            self.ref_frames
        };
        let size = if self.long_term_interval > 0 { size + 1 } else { size };
        size.min(16)
    }
}

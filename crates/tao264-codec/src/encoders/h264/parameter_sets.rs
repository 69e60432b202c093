//! 序列参数集 (SPS) 与图像参数集 (PPS).
//!
//! 会话开始时构建一次, slice 头部按 id 引用.

use tao264_core::Rational;
use tao264_core::bitwriter::BitWriter;

use super::config::H264EncoderConfig;
use super::nal::{NalPriority, NalUnit, NalUnitType};

/// Main profile
pub const PROFILE_MAIN: u8 = 77;
/// High profile (8x8 变换)
pub const PROFILE_HIGH: u8 = 100;
/// High 4:4:4 Predictive (无损旁路变换)
pub const PROFILE_HIGH444: u8 = 244;

/// 级别限制: (level_idc, MaxMBPS, MaxFS, MaxDpbMbs)
const LEVEL_LIMITS: [(u8, u32, u32, u32); 16] = [
    (10, 1485, 99, 396),
    (11, 3000, 396, 900),
    (12, 6000, 396, 2376),
    (13, 11880, 396, 2376),
    (20, 11880, 396, 2376),
    (21, 19800, 792, 4752),
    (22, 20250, 1620, 8100),
    (30, 40500, 1620, 8100),
    (31, 108000, 3600, 18000),
    (32, 216000, 5120, 20480),
    (40, 245760, 8192, 32768),
    (41, 245760, 8192, 32768),
    (42, 522240, 8704, 34816),
    (50, 589824, 22080, 110400),
    (51, 983040, 36864, 184320),
    (52, 2073600, 36864, 184320),
];

/// 向上取整的 log2
fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

/// 按帧尺寸、帧率与参考帧数选择最低满足要求的级别
pub fn derive_level(mb_width: u32, mb_height: u32, fps: f64, num_ref_frames: u32) -> u8 {
    let frame_mbs = mb_width * mb_height;
    let mbps = (f64::from(frame_mbs) * fps).ceil() as u64;
    for &(level, max_mbps, max_fs, max_dpb) in &LEVEL_LIMITS {
        // 宽高均不得超过 sqrt(8 * MaxFS)
        let max_dim = f64::from(max_fs * 8).sqrt() as u32;
        if frame_mbs <= max_fs
            && mb_width <= max_dim
            && mb_height <= max_dim
            && mbps <= u64::from(max_mbps)
            && u64::from(num_ref_frames) * u64::from(frame_mbs) <= u64::from(max_dpb)
        {
            return level;
        }
    }
    52
}

/// VUI 参数
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vui {
    /// 像素宽高比
    pub sar: Option<(u32, u32)>,
    /// (num_units_in_tick, time_scale)
    pub timing: Option<(u32, u32)>,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

/// 序列参数集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    pub transform_bypass: bool,
    pub log2_max_frame_num: u32,
    pub log2_max_poc_lsb: u32,
    pub num_ref_frames: u32,
    pub mb_width: u32,
    pub mb_height: u32,
    /// 右侧与底部裁剪 (色度样本单位, 4:2:0 下为 2 像素)
    pub crop_right: u32,
    pub crop_bottom: u32,
    pub vui: Vui,
}

impl Sps {
    /// 按配置与图像尺寸构建 SPS
    pub fn new(config: &H264EncoderConfig, width: u32, height: u32, frame_rate: Option<Rational>) -> Self {
        let mb_width = width.div_ceil(16);
        let mb_height = height.div_ceil(16);
        let profile_idc = if config.lossless {
            PROFILE_HIGH444
        } else if config.transform_8x8 {
            PROFILE_HIGH
        } else {
            PROFILE_MAIN
        };
        let num_ref_frames = config.dpb_size();
        let fps = frame_rate
            .filter(|r| r.is_positive())
            .map_or(25.0, |r| r.to_f64());
        let timing = frame_rate
            .filter(|r| r.is_positive())
            .map(|r| (r.den as u32, r.num as u32 * 2));
        let log2_max_frame_num = ceil_log2(config.keyint_max + 1).clamp(4, 16);
        let log2_max_poc_lsb = (ceil_log2(4 * (config.bframes + 1)) + 1).clamp(4, 16);
        Self {
            profile_idc,
            constraint_flags: 0,
            level_idc: derive_level(mb_width, mb_height, fps, num_ref_frames),
            sps_id: 0,
            transform_bypass: config.lossless,
            log2_max_frame_num,
            log2_max_poc_lsb,
            num_ref_frames,
            mb_width,
            mb_height,
            crop_right: (mb_width * 16 - width) / 2,
            crop_bottom: (mb_height * 16 - height) / 2,
            vui: Vui {
                sar: None,
                timing,
                max_num_reorder_frames: u32::from(config.bframes > 0),
                max_dec_frame_buffering: num_ref_frames,
            },
        }
    }

    /// MaxFrameNum
    pub fn max_frame_num(&self) -> u32 {
        1 << self.log2_max_frame_num
    }

    /// MaxPicOrderCntLsb
    pub fn max_poc_lsb(&self) -> u32 {
        1 << self.log2_max_poc_lsb
    }

    fn is_high_family(&self) -> bool {
        matches!(self.profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128)
    }

    /// 写出 seq_parameter_set_rbsp()
    pub fn write_rbsp(&self, bw: &mut BitWriter) {
        bw.write_bits(u32::from(self.profile_idc), 8);
        bw.write_bits(u32::from(self.constraint_flags), 8);
        bw.write_bits(u32::from(self.level_idc), 8);
        bw.write_ue(self.sps_id);
        if self.is_high_family() {
            bw.write_ue(1); // chroma_format_idc: 4:2:0
            bw.write_ue(0); // bit_depth_luma_minus8
            bw.write_ue(0); // bit_depth_chroma_minus8
            bw.write_flag(self.transform_bypass);
            bw.write_flag(false); // seq_scaling_matrix_present_flag
        }
        bw.write_ue(self.log2_max_frame_num - 4);
        bw.write_ue(0); // pic_order_cnt_type
        bw.write_ue(self.log2_max_poc_lsb - 4);
        bw.write_ue(self.num_ref_frames);
        bw.write_flag(false); // gaps_in_frame_num_value_allowed_flag
        bw.write_ue(self.mb_width - 1);
        bw.write_ue(self.mb_height - 1);
        bw.write_flag(true); // frame_mbs_only_flag
        bw.write_flag(true); // direct_8x8_inference_flag

        let cropping = self.crop_right != 0 || self.crop_bottom != 0;
        bw.write_flag(cropping);
        if cropping {
            bw.write_ue(0);
            bw.write_ue(self.crop_right);
            bw.write_ue(0);
            bw.write_ue(self.crop_bottom);
        }

        bw.write_flag(true); // vui_parameters_present_flag
        self.write_vui(bw);
        bw.write_trailing_bits();
    }

    fn write_vui(&self, bw: &mut BitWriter) {
        let vui = &self.vui;
        bw.write_flag(vui.sar.is_some());
        if let Some((w, h)) = vui.sar {
            bw.write_bits(255, 8); // Extended_SAR
            bw.write_bits(w, 16);
            bw.write_bits(h, 16);
        }
        bw.write_flag(false); // overscan_info_present_flag
        bw.write_flag(false); // video_signal_type_present_flag
        bw.write_flag(false); // chroma_loc_info_present_flag
        bw.write_flag(vui.timing.is_some());
        if let Some((num_units_in_tick, time_scale)) = vui.timing {
            bw.write_bits(num_units_in_tick, 32);
            bw.write_bits(time_scale, 32);
            bw.write_flag(true); // fixed_frame_rate_flag
        }
        bw.write_flag(false); // nal_hrd_parameters_present_flag
        bw.write_flag(false); // vcl_hrd_parameters_present_flag
        bw.write_flag(false); // pic_struct_present_flag
        bw.write_flag(true); // bitstream_restriction_flag
        bw.write_flag(true); // motion_vectors_over_pic_boundaries_flag
        bw.write_ue(0); // max_bytes_per_pic_denom
        bw.write_ue(0); // max_bits_per_mb_denom
        bw.write_ue(15); // log2_max_mv_length_horizontal
        bw.write_ue(15); // log2_max_mv_length_vertical
        bw.write_ue(vui.max_num_reorder_frames);
        bw.write_ue(vui.max_dec_frame_buffering);
    }

    /// 封装为 NAL
    pub fn to_nal(&self) -> NalUnit {
        let mut bw = BitWriter::with_capacity(32);
        self.write_rbsp(&mut bw);
        NalUnit::from_rbsp(NalUnitType::Sps, NalPriority::Highest, &bw.finish())
    }
}

/// 图像参数集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    pub entropy_coding_mode: bool,
    pub num_ref_idx_default_active: [u32; 2],
    pub weighted_bipred_idc: u32,
    pub pic_init_qp_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub transform_8x8_mode: bool,
}

impl Pps {
    pub fn new(config: &H264EncoderConfig) -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            entropy_coding_mode: true,
            num_ref_idx_default_active: [config.ref_frames, 1],
            weighted_bipred_idc: if config.weighted_bipred && config.bframes > 0 {
                2
            } else {
                0
            },
            pic_init_qp_minus26: i32::from(config.qp) - 26,
            chroma_qp_index_offset: i32::from(config.chroma_qp_offset),
            deblocking_filter_control_present: true,
            transform_8x8_mode: config.transform_8x8 && !config.lossless,
        }
    }

    /// 写出 pic_parameter_set_rbsp()
    pub fn write_rbsp(&self, bw: &mut BitWriter) {
        bw.write_ue(self.pps_id);
        bw.write_ue(self.sps_id);
        bw.write_flag(self.entropy_coding_mode);
        bw.write_flag(false); // bottom_field_pic_order_in_frame_present_flag
        bw.write_ue(0); // num_slice_groups_minus1
        bw.write_ue(self.num_ref_idx_default_active[0] - 1);
        bw.write_ue(self.num_ref_idx_default_active[1] - 1);
        bw.write_flag(false); // weighted_pred_flag
        bw.write_bits(self.weighted_bipred_idc, 2);
        bw.write_se(self.pic_init_qp_minus26);
        bw.write_se(0); // pic_init_qs_minus26
        bw.write_se(self.chroma_qp_index_offset);
        bw.write_flag(self.deblocking_filter_control_present);
        bw.write_flag(false); // constrained_intra_pred_flag
        bw.write_flag(false); // redundant_pic_cnt_present_flag
        if self.transform_8x8_mode {
            bw.write_flag(true);
            bw.write_flag(false); // pic_scaling_matrix_present_flag
            bw.write_se(self.chroma_qp_index_offset);
        }
        bw.write_trailing_bits();
    }

    /// 封装为 NAL
    pub fn to_nal(&self) -> NalUnit {
        let mut bw = BitWriter::with_capacity(16);
        self.write_rbsp(&mut bw);
        NalUnit::from_rbsp(NalUnitType::Pps, NalPriority::Highest, &bw.finish())
    }
}

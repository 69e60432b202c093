//! Slice 头部: 参考列表修改命令、解码参考图像标记与语法写出.

use tao264_core::bitwriter::BitWriter;

use super::parameter_sets::{Pps, Sps};

/// Slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    P,
    B,
    I,
}

impl SliceType {
    /// slice_type 语法值 (0..=2, 写出时加 5 表示整帧同类型)
    pub fn raw(self) -> u32 {
        match self {
            Self::P => 0,
            Self::B => 1,
            Self::I => 2,
        }
    }

    pub fn from_raw(value: u32) -> Option<Self> {
        match value % 5 {
            0 => Some(Self::P),
            1 => Some(Self::B),
            2 => Some(Self::I),
            _ => None,
        }
    }

    pub fn is_intra(self) -> bool {
        self == Self::I
    }

    /// 统计数组下标
    pub fn index(self) -> usize {
        self.raw() as usize
    }
}

impl std::fmt::Display for SliceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P => write!(f, "P"),
            Self::B => write!(f, "B"),
            Self::I => write!(f, "I"),
        }
    }
}

/// 参考列表修改命令 (modification_of_pic_nums_idc 与参数)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderOp {
    /// idc 0: picNum 预测值减去 abs_diff_pic_num_minus1 + 1
    ShortSub { abs_diff_pic_num_minus1: u32 },
    /// idc 1: picNum 预测值加上 abs_diff_pic_num_minus1 + 1
    ShortAdd { abs_diff_pic_num_minus1: u32 },
    /// idc 2: 长期参考帧
    Long { long_term_pic_num: u32 },
}

/// 内存管理控制操作 (MMCO)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    /// 1: 短期参考帧标记为不用于参考
    ForgetShort { difference_of_pic_nums_minus1: u32 },
    /// 2: 长期参考帧标记为不用于参考
    ForgetLong { long_term_pic_num: u32 },
    /// 3: 短期参考帧转为长期
    ShortToLong {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    /// 4: 设置最大长期帧索引
    TrimLong { max_long_term_frame_idx_plus1: u32 },
    /// 5: 清空全部参考帧
    ClearAll,
    /// 6: 当前帧标记为长期参考帧
    MarkCurrentLong { long_term_frame_idx: u32 },
}

impl MemoryOp {
    fn opcode(&self) -> u32 {
        match self {
            Self::ForgetShort { .. } => 1,
            Self::ForgetLong { .. } => 2,
            Self::ShortToLong { .. } => 3,
            Self::TrimLong { .. } => 4,
            Self::ClearAll => 5,
            Self::MarkCurrentLong { .. } => 6,
        }
    }
}

/// dec_ref_pic_marking() 内容
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefPicMarking {
    /// 非参考图像, 不写出
    #[default]
    None,
    /// IDR: no_output_of_prior_pics_flag 与 long_term_reference_flag
    Idr { long_term: bool },
    /// 滑动窗口
    SlidingWindow,
    /// 显式 MMCO
    Adaptive(Vec<MemoryOp>),
}

/// Slice 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb: u32,
    pub slice_type: SliceType,
    pub pps_id: u32,
    pub frame_num: u32,
    /// IDR 图像的 idr_pic_id
    pub idr_pic_id: Option<u32>,
    pub poc_lsb: u32,
    /// B slice 直接预测方式 (false 为时间直接预测)
    pub direct_spatial_mv_pred: bool,
    /// 各列表实际使用的参考数
    pub num_ref_idx_active: [u32; 2],
    pub reorder: [Vec<ReorderOp>; 2],
    pub marking: RefPicMarking,
    pub cabac_init_idc: u8,
    /// slice QP 相对 pic_init_qp 的差值
    pub qp_delta: i32,
    pub disable_deblocking_filter_idc: u32,
    pub slice_alpha_c0_offset_div2: i32,
    pub slice_beta_offset_div2: i32,
}

impl SliceHeader {
    /// slice QP
    pub fn slice_qp(&self, pps: &Pps) -> i32 {
        26 + pps.pic_init_qp_minus26 + self.qp_delta
    }

    /// 写出 slice_header() 语法
    pub fn write(&self, bw: &mut BitWriter, sps: &Sps, pps: &Pps, nal_ref_idc: u8) {
        bw.write_ue(self.first_mb);
        bw.write_ue(self.slice_type.raw() + 5);
        bw.write_ue(self.pps_id);
        bw.write_bits(self.frame_num, sps.log2_max_frame_num);
        if let Some(idr_pic_id) = self.idr_pic_id {
            bw.write_ue(idr_pic_id);
        }
        bw.write_bits(self.poc_lsb, sps.log2_max_poc_lsb);

        if self.slice_type == SliceType::B {
            bw.write_flag(self.direct_spatial_mv_pred);
        }
        if self.slice_type != SliceType::I {
            let lists = if self.slice_type == SliceType::B { 2 } else { 1 };
            let overridden =
                (0..lists).any(|l| self.num_ref_idx_active[l] != pps.num_ref_idx_default_active[l]);
            bw.write_flag(overridden);
            if overridden {
                for l in 0..lists {
                    bw.write_ue(self.num_ref_idx_active[l].max(1) - 1);
                }
            }
            for l in 0..lists {
                write_reorder_ops(bw, &self.reorder[l]);
            }
        }

        if nal_ref_idc != 0 {
            match &self.marking {
                RefPicMarking::Idr { long_term } => {
                    bw.write_flag(false);
                    bw.write_flag(*long_term);
                }
                RefPicMarking::Adaptive(ops) => {
                    bw.write_flag(true);
                    for op in ops {
                        bw.write_ue(op.opcode());
                        match *op {
                            MemoryOp::ForgetShort {
                                difference_of_pic_nums_minus1,
                            } => bw.write_ue(difference_of_pic_nums_minus1),
                            MemoryOp::ForgetLong { long_term_pic_num } => {
                                bw.write_ue(long_term_pic_num)
                            }
                            MemoryOp::ShortToLong {
                                difference_of_pic_nums_minus1,
                                long_term_frame_idx,
                            } => {
                                bw.write_ue(difference_of_pic_nums_minus1);
                                bw.write_ue(long_term_frame_idx);
                            }
                            MemoryOp::TrimLong {
                                max_long_term_frame_idx_plus1,
                            } => bw.write_ue(max_long_term_frame_idx_plus1),
                            MemoryOp::ClearAll => {}
                            MemoryOp::MarkCurrentLong { long_term_frame_idx } => {
                                bw.write_ue(long_term_frame_idx)
                            }
                        }
                    }
                    bw.write_ue(0);
                }
                RefPicMarking::SlidingWindow | RefPicMarking::None => bw.write_flag(false),
            }
        }

        if pps.entropy_coding_mode && self.slice_type != SliceType::I {
            bw.write_ue(u32::from(self.cabac_init_idc));
        }
        bw.write_se(self.qp_delta);
        if pps.deblocking_filter_control_present {
            bw.write_ue(self.disable_deblocking_filter_idc);
            if self.disable_deblocking_filter_idc != 1 {
                bw.write_se(self.slice_alpha_c0_offset_div2);
                bw.write_se(self.slice_beta_offset_div2);
            }
        }
    }
}

fn write_reorder_ops(bw: &mut BitWriter, ops: &[ReorderOp]) {
    bw.write_flag(!ops.is_empty());
    if ops.is_empty() {
        return;
    }
    for op in ops {
        match *op {
            ReorderOp::ShortSub {
                abs_diff_pic_num_minus1,
            } => {
                bw.write_ue(0);
                bw.write_ue(abs_diff_pic_num_minus1);
            }
            ReorderOp::ShortAdd {
                abs_diff_pic_num_minus1,
            } => {
                bw.write_ue(1);
                bw.write_ue(abs_diff_pic_num_minus1);
            }
            ReorderOp::Long { long_term_pic_num } => {
                bw.write_ue(2);
                bw.write_ue(long_term_pic_num);
            }
        }
    }
    bw.write_ue(3);
}

/// 测试用: 按 SPS/PPS 解析 slice 头部
#[cfg(test)]
pub(crate) fn parse_slice_header(
    br: &mut tao264_core::bitreader::BitReader<'_>,
    sps: &Sps,
    pps: &Pps,
    idr: bool,
    nal_ref_idc: u8,
) -> tao264_core::TaoResult<SliceHeader> {
    use tao264_core::TaoError;

    let first_mb = br.read_ue()?;
    let slice_type = SliceType::from_raw(br.read_ue()?)
        .ok_or_else(|| TaoError::InvalidData("slice_type 非法".into()))?;
    let pps_id = br.read_ue()?;
    let frame_num = br.read_bits(sps.log2_max_frame_num)?;
    let idr_pic_id = if idr { Some(br.read_ue()?) } else { None };
    let poc_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
    let mut direct_spatial_mv_pred = false;
    if slice_type == SliceType::B {
        direct_spatial_mv_pred = br.read_flag()?;
    }
    let mut num_ref_idx_active = pps.num_ref_idx_default_active;
    let mut reorder: [Vec<ReorderOp>; 2] = [Vec::new(), Vec::new()];
    if slice_type != SliceType::I {
        let lists = if slice_type == SliceType::B { 2 } else { 1 };
        if br.read_flag()? {
            for active in num_ref_idx_active.iter_mut().take(lists) {
                *active = br.read_ue()? + 1;
            }
        }
        for ops in reorder.iter_mut().take(lists) {
            if br.read_flag()? {
                loop {
                    match br.read_ue()? {
                        0 => ops.push(ReorderOp::ShortSub {
                            abs_diff_pic_num_minus1: br.read_ue()?,
                        }),
                        1 => ops.push(ReorderOp::ShortAdd {
                            abs_diff_pic_num_minus1: br.read_ue()?,
                        }),
                        2 => ops.push(ReorderOp::Long {
                            long_term_pic_num: br.read_ue()?,
                        }),
                        _ => break,
                    }
                }
            }
        }
    }
    let mut marking = RefPicMarking::None;
    if nal_ref_idc != 0 {
        if idr {
            br.read_flag()?;
            marking = RefPicMarking::Idr {
                long_term: br.read_flag()?,
            };
        } else if br.read_flag()? {
            let mut ops = Vec::new();
            loop {
                let op = match br.read_ue()? {
                    0 => break,
                    1 => MemoryOp::ForgetShort {
                        difference_of_pic_nums_minus1: br.read_ue()?,
                    },
                    2 => MemoryOp::ForgetLong {
                        long_term_pic_num: br.read_ue()?,
                    },
                    3 => MemoryOp::ShortToLong {
                        difference_of_pic_nums_minus1: br.read_ue()?,
                        long_term_frame_idx: br.read_ue()?,
                    },
                    4 => MemoryOp::TrimLong {
                        max_long_term_frame_idx_plus1: br.read_ue()?,
                    },
                    5 => MemoryOp::ClearAll,
                    _ => MemoryOp::MarkCurrentLong {
                        long_term_frame_idx: br.read_ue()?,
                    },
                };
                ops.push(op);
            }
            marking = RefPicMarking::Adaptive(ops);
        } else {
            marking = RefPicMarking::SlidingWindow;
        }
    }
    let mut cabac_init_idc = 0;
    if pps.entropy_coding_mode && slice_type != SliceType::I {
        cabac_init_idc = br.read_ue()? as u8;
    }
    let qp_delta = br.read_se()?;
    let mut disable_deblocking_filter_idc = 0;
    let mut slice_alpha_c0_offset_div2 = 0;
    let mut slice_beta_offset_div2 = 0;
    if pps.deblocking_filter_control_present {
        disable_deblocking_filter_idc = br.read_ue()?;
        if disable_deblocking_filter_idc != 1 {
            slice_alpha_c0_offset_div2 = br.read_se()?;
            slice_beta_offset_div2 = br.read_se()?;
        }
    }
    Ok(SliceHeader {
        first_mb,
        slice_type,
        pps_id,
        frame_num,
        idr_pic_id,
        poc_lsb,
        direct_spatial_mv_pred,
        num_ref_idx_active,
        reorder,
        marking,
        cabac_init_idc,
        qp_delta,
        disable_deblocking_filter_idc,
        slice_alpha_c0_offset_div2,
        slice_beta_offset_div2,
    })
}

//! H.264 NAL (Network Abstraction Layer) 单元封装.
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```
//!
//! 载荷在写入时即完成防竞争处理 (EBSP). 输出支持两种封装:
//! - Annex B: 起始码分隔, 参数集与访问单元首个 NAL 使用 4 字节 `00 00 00 01`,
//!   其余使用 3 字节 `00 00 01`;
//! - AVCC: 每个 NAL 前加 4 字节大端长度.

use tao264_core::bitwriter::BitWriter;
use tao264_core::{TaoError, TaoResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// 非 IDR 图像切片 (P/B slice)
    Slice,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息
    Sei,
    /// 序列参数集
    Sps,
    /// 图像参数集
    Pps,
    /// 访问单元分隔符
    Aud,
}

impl NalUnitType {
    /// 类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
        }
    }

    /// 是否为 VCL NAL
    pub fn is_vcl(&self) -> bool {
        matches!(self, Self::Slice | Self::SliceIdr)
    }

    /// 是否为参数集
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
        }
    }
}

/// nal_ref_idc 取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NalPriority {
    /// 非参考图像 (B 帧)
    Disposable = 0,
    Low = 1,
    High = 2,
    /// 参数集与 IDR
    Highest = 3,
}

/// 已封装的 NAL 单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (0-3)
    pub ref_idc: u8,
    /// NAL 数据 (含头部字节与防竞争字节, 不含起始码)
    pub data: Vec<u8>,
}

impl NalUnit {
    /// 开始写入一个 NAL: 返回已写入头部字节的防竞争写入器
    pub fn begin(nal_type: NalUnitType, priority: NalPriority, capacity: usize) -> BitWriter {
        let mut bw = BitWriter::escaped_with_capacity(capacity + 1);
        bw.write_bits(u32::from(header_byte(nal_type, priority as u8)), 8);
        bw
    }

    /// 由 [`NalUnit::begin`] 得到的写入器完成 NAL
    ///
    /// 调用方负责在此之前写入 rbsp_trailing_bits (或 CABAC 终止).
    pub fn from_writer(nal_type: NalUnitType, priority: NalPriority, bw: BitWriter) -> Self {
        Self {
            nal_type,
            ref_idc: priority as u8,
            data: bw.finish(),
        }
    }

    /// 由完整 RBSP (含尾部比特) 创建 NAL, 插入防竞争字节
    pub fn from_rbsp(nal_type: NalUnitType, priority: NalPriority, rbsp: &[u8]) -> Self {
        let mut bw = Self::begin(nal_type, priority, rbsp.len() + rbsp.len() / 64);
        bw.write_bytes(rbsp);
        Self::from_writer(nal_type, priority, bw)
    }

    /// NAL 头部字节
    pub fn header(&self) -> u8 {
        header_byte(self.nal_type, self.ref_idc)
    }

    /// 载荷 (不含头部字节)
    pub fn payload(&self) -> &[u8] {
        &self.data[1..]
    }

    /// 以 Annex B 起始码写出
    pub fn write_annex_b(&self, out: &mut Vec<u8>, long_start_code: bool) {
        if long_start_code {
            out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        } else {
            out.extend_from_slice(&[0x00, 0x00, 0x01]);
        }
        out.extend_from_slice(&self.data);
    }

    /// 以 4 字节长度前缀写出
    pub fn write_length_prefixed(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
    }
}

fn header_byte(nal_type: NalUnitType, ref_idc: u8) -> u8 {
    ((ref_idc & 0x03) << 5) | nal_type.type_id()
}

/// 把一个访问单元的 NAL 列表序列化为字节流
pub fn serialize_access_unit(nals: &[NalUnit], annex_b: bool) -> Vec<u8> {
    let total: usize = nals.iter().map(|n| n.data.len() + 4).sum();
    let mut out = Vec::with_capacity(total);
    for (i, nal) in nals.iter().enumerate() {
        if annex_b {
            nal.write_annex_b(&mut out, i == 0 || nal.nal_type.is_parameter_set());
        } else {
            nal.write_length_prefixed(&mut out);
        }
    }
    out
}

/// 构建 AVCDecoderConfigurationRecord (4 字节长度前缀)
pub fn build_avcc_config(sps: &NalUnit, pps: &NalUnit) -> TaoResult<Vec<u8>> {
    if sps.data.len() < 4 {
        return Err(TaoError::InvalidData("H.264: SPS 数据太短".into()));
    }
    let profile_idc = sps.data[1];
    let mut out = vec![
        1,            // configurationVersion
        profile_idc,  // profile_idc
        sps.data[2],  // profile_compatibility
        sps.data[3],  // level_idc
        0xFC | 3,     // lengthSizeMinusOne
        0xE0 | 1,     // numOfSPS
    ];
    out.extend_from_slice(&(sps.data.len() as u16).to_be_bytes());
    out.extend_from_slice(&sps.data);
    out.push(1);
    out.extend_from_slice(&(pps.data.len() as u16).to_be_bytes());
    out.extend_from_slice(&pps.data);

    // High 系列 profile 的扩展字段: 4:2:0, 8 bit, 无 SPS 扩展
    if matches!(profile_idc, 100 | 110 | 122 | 144 | 244) {
        out.push(0xFC | 1);
        out.push(0xF8);
        out.push(0xF8);
        out.push(0);
    }
    Ok(out)
}

/// 移除防竞争字节 (测试中把 EBSP 还原为 RBSP)
#[cfg(test)]
pub(crate) fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// 按起始码切分 Annex B 字节流, 返回不含起始码的 NAL 数据
#[cfg(test)]
pub(crate) fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push(i + 3);
            i += 3;
        } else {
            i += 1;
        }
    }
    let mut nals = Vec::with_capacity(starts.len());
    for (k, &start) in starts.iter().enumerate() {
        let mut end = starts.get(k + 1).map_or(data.len(), |&next| next - 3);
        while end > start && data[end - 1] == 0 {
            end -= 1;
        }
        nals.push(&data[start..end]);
    }
    nals
}

use tao264_core::bitreader::BitReader;
use tao264_core::{PixelFormat, Rational, TaoError};

use crate::codec_id::CodecId;
use crate::codec_parameters::{CodecParameters, VideoCodecParams};
use crate::encoder::Encoder;
use crate::frame::VideoFrame;
use crate::packet::Packet;

use super::super::nal::remove_emulation_prevention;
use super::super::{H264Encoder, H264EncoderConfig};

pub fn video_params(width: u32, height: u32, pixel_format: PixelFormat) -> CodecParameters {
    CodecParameters::new_video(
        CodecId::H264,
        VideoCodecParams {
            width,
            height,
            pixel_format,
            frame_rate: Rational::new(25, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        },
    )
}

/// 单线程、无 B 帧的小尺寸测试配置
pub fn base_config() -> H264EncoderConfig {
    H264EncoderConfig {
        bframes: 0,
        lookahead: 1,
        threads: 0,
        ..H264EncoderConfig::default()
    }
}

pub fn open_encoder(config: H264EncoderConfig, width: u32, height: u32) -> H264Encoder {
    let mut enc = H264Encoder::with_config(config);
    enc.open(&video_params(width, height, PixelFormat::Yuv420p))
        .expect("打开编码器");
    enc
}

/// 三平面 YUV420P 帧, `f(plane, x, y)` 给出样本值
pub fn yuv_frame(width: u32, height: u32, pts: i64, f: impl Fn(usize, usize, usize) -> u8) -> VideoFrame {
    let mut frame = VideoFrame::alloc(width, height, PixelFormat::Yuv420p);
    for plane in 0..3 {
        let stride = frame.linesize[plane];
        let rows = frame.data[plane].len() / stride;
        for y in 0..rows {
            for x in 0..stride {
                frame.data[plane][y * stride + x] = f(plane, x, y);
            }
        }
    }
    frame.pts = pts;
    frame.duration = 1;
    frame.time_base = Rational::new(1, 25);
    frame
}

pub fn flat_frame(width: u32, height: u32, pts: i64, value: u8) -> VideoFrame {
    yuv_frame(width, height, pts, |p, _, _| if p == 0 { value } else { 128 })
}

/// 水平平移 `dx` 像素的平滑纹理
pub fn textured_frame(width: u32, height: u32, pts: i64, dx: f64) -> VideoFrame {
    yuv_frame(width, height, pts, |p, x, y| {
        let scale = if p == 0 { 1.0 } else { 2.0 };
        let (x, y) = (x as f64 * scale + dx, y as f64 * scale);
        let v = 128.0 + 60.0 * (x * 0.3).sin() * (y * 0.2).cos() + 20.0 * ((x + y) * 0.11).sin();
        v.round().clamp(0.0, 255.0) as u8
    })
}

/// 取出当前全部可用数据包
pub fn drain(enc: &mut H264Encoder, out: &mut Vec<Packet>) {
    loop {
        match enc.receive_packet() {
            Ok(pkt) => out.push(pkt),
            Err(TaoError::NeedMoreData) | Err(TaoError::Eof) => break,
            Err(e) => panic!("取包失败: {e}"),
        }
    }
}

/// 送入全部帧并结束编码, 返回编码顺序的数据包
pub fn encode_all(enc: &mut H264Encoder, frames: &[VideoFrame]) -> Vec<Packet> {
    let mut packets = Vec::new();
    for frame in frames {
        enc.send_frame(Some(frame)).expect("送入帧");
        drain(enc, &mut packets);
    }
    enc.send_frame(None).expect("结束信号");
    drain(enc, &mut packets);
    packets
}

/// 按起始码切分 Annex B 字节流, 返回不含起始码的 NAL
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
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
    starts
        .iter()
        .enumerate()
        .map(|(k, &s)| {
            let mut end = starts.get(k + 1).map_or(data.len(), |&n| n - 3);
            // 4 字节起始码的前导 0
            while end > s && data[end - 1] == 0 && k + 1 < starts.len() {
                end -= 1;
            }
            &data[s..end]
        })
        .collect()
}

/// 按 4 字节长度前缀切分
pub fn split_length_prefixed(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 4 <= data.len() {
        let len = u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        out.push(&data[pos + 4..pos + 4 + len]);
        pos += 4 + len;
    }
    assert_eq!(pos, data.len(), "长度前缀应恰好覆盖整个数据包");
    out
}

pub fn nal_type(nal: &[u8]) -> u8 {
    nal[0] & 0x1F
}

pub fn nal_ref_idc(nal: &[u8]) -> u8 {
    (nal[0] >> 5) & 3
}

/// slice 头部的前几个字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePrefix {
    pub first_mb: u32,
    pub slice_type: u32,
    pub frame_num: u32,
    pub idr_pic_id: Option<u32>,
}

pub fn parse_slice_prefix(nal: &[u8], log2_max_frame_num: u32) -> SlicePrefix {
    let rbsp = remove_emulation_prevention(&nal[1..]);
    let mut br = BitReader::new(&rbsp);
    let first_mb = br.read_ue().expect("first_mb_in_slice");
    let slice_type = br.read_ue().expect("slice_type") % 5;
    br.read_ue().expect("pps_id");
    let frame_num = br.read_bits(log2_max_frame_num).expect("frame_num");
    let idr_pic_id = (nal_type(nal) == 5).then(|| br.read_ue().expect("idr_pic_id"));
    SlicePrefix {
        first_mb,
        slice_type,
        frame_num,
        idr_pic_id,
    }
}

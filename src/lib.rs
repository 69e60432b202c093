//! # tao264
//!
//! 纯 Rust 实现的 H.264/AVC 编码器.
//!
//! 编码器按宏块工作, 输出 CABAC 熵编码的 Annex B 或长度前缀码流:
//! - **帧管理**: lookahead 帧类型决策、参考列表、DPB 标记、时域 direct
//! - **宏块编码**: 帧内/帧间模式决策、变换量化、CABAC 语法元素
//! - **码率控制**: 固定 QP 与平均码率 (ABR)
//! - **并行**: 按 slice 切分的多线程编码
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao264::codec::{CodecId, CodecParameters, VideoCodecParams, VideoFrame};
//! use tao264::core::{PixelFormat, Rational};
//!
//! let registry = tao264::default_codec_registry();
//! let mut encoder = registry.create_encoder(CodecId::H264).unwrap();
//! let params = CodecParameters::new_video(
//!     CodecId::H264,
//!     VideoCodecParams {
//!         width: 320,
//!         height: 240,
//!         pixel_format: PixelFormat::Yuv420p,
//!         frame_rate: Rational::new(25, 1),
//!         sample_aspect_ratio: Rational::new(1, 1),
//!     },
//! );
//! encoder.open(&params).unwrap();
//! let frame = VideoFrame::alloc(320, 240, PixelFormat::Yuv420p);
//! encoder.send_frame(Some(&frame)).unwrap();
//! encoder.send_frame(None).unwrap();
//! while let Ok(packet) = encoder.receive_packet() {
//!     println!("pts={} 大小={}", packet.pts, packet.data.len());
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao264-core` | 错误类型、比特流读写、像素格式、时间基 |
//! | `tao264-codec` | 编码器框架与 H.264 编码器 |

/// 核心类型与工具
pub use tao264_core as core;

/// 编码器框架与 H.264 编码器
pub use tao264_codec as codec;

pub mod logging;

/// 获取 tao264 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置编码器的注册表
pub fn default_codec_registry() -> tao264_codec::CodecRegistry {
    let mut registry = tao264_codec::CodecRegistry::new();
    tao264_codec::register_all(&mut registry);
    registry
}

//! # tao264-codec
//!
//! tao264 编码器库, 提供编码器框架与 H.264/AVC 编码器实现.
//!
//! 框架部分对标 FFmpeg 的 libavcodec 编码侧抽象: 编码器注册、
//! `send_frame`/`receive_packet` 流程、`VideoFrame` 与 `Packet`.
//!
//! ## 使用示例
//!
//! ```rust
//! use tao264_codec::{CodecId, CodecRegistry};
//!
//! let mut reg = CodecRegistry::new();
//! tao264_codec::register_all(&mut reg);
//!
//! let encoder = reg.create_encoder(CodecId::H264).unwrap();
//! assert_eq!(encoder.name(), "libtao264");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod encoder;
pub mod encoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{CodecParameters, CodecParamsType, VideoCodecParams};
pub use encoder::Encoder;
pub use frame::{PictureType, VideoFrame};
pub use packet::Packet;
pub use registry::CodecRegistry;

/// 注册所有内置编码器
pub fn register_all(registry: &mut CodecRegistry) {
    encoders::register_all_encoders(registry);
}

//! # tao264-core
//!
//! tao264 编码器核心库: 统一错误类型、RBSP 比特读写、像素格式、有理数与时间戳.

pub mod bitreader;
pub mod bitwriter;
pub mod error;
pub mod pixel_format;
pub mod rational;
pub mod timestamp;

// 重导出常用类型
pub use error::{TaoError, TaoResult};
pub use pixel_format::PixelFormat;
pub use rational::Rational;
pub use timestamp::NOPTS_VALUE;

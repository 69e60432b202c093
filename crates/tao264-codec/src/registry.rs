//! 编码器注册表.
//!
//! 对标 FFmpeg 的编解码器注册机制, 支持按标识查找和实例化编码器.

use std::collections::HashMap;

use tao264_core::{TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::encoder::Encoder;

/// 编码器工厂函数类型
pub type EncoderFactory = fn() -> TaoResult<Box<dyn Encoder>>;

/// 编码器注册表
pub struct CodecRegistry {
    /// 编码器工厂映射
    encoders: HashMap<CodecId, Vec<EncoderEntry>>,
}

/// 编码器注册条目
struct EncoderEntry {
    /// 编码器名称
    name: String,
    /// 工厂函数
    factory: EncoderFactory,
}

impl CodecRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            encoders: HashMap::new(),
        }
    }

    /// 注册一个编码器
    pub fn register_encoder(
        &mut self,
        codec_id: CodecId,
        name: impl Into<String>,
        factory: EncoderFactory,
    ) {
        self.encoders
            .entry(codec_id)
            .or_default()
            .push(EncoderEntry {
                name: name.into(),
                factory,
            });
    }

    /// 创建指定编解码器 ID 的编码器实例 (使用最先注册的实现)
    pub fn create_encoder(&self, codec_id: CodecId) -> TaoResult<Box<dyn Encoder>> {
        let entry = self
            .encoders
            .get(&codec_id)
            .and_then(|entries| entries.first())
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到 {} 的编码器", codec_id)))?;
        (entry.factory)()
    }

    /// 按名称创建编码器实例
    pub fn create_encoder_by_name(&self, name: &str) -> TaoResult<Box<dyn Encoder>> {
        let entry = self
            .encoders
            .values()
            .flatten()
            .find(|e| e.name == name)
            .ok_or_else(|| TaoError::CodecNotFound(format!("未找到名为 {} 的编码器", name)))?;
        (entry.factory)()
    }

    /// 获取所有已注册的编码器名称
    pub fn list_encoders(&self) -> Vec<(CodecId, &str)> {
        let mut result = Vec::new();
        for (id, entries) in &self.encoders {
            for entry in entries {
                result.push((*id, entry.name.as_str()));
            }
        }
        result
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_encoders() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);
        let encoders = registry.list_encoders();
        assert_eq!(encoders, vec![(CodecId::H264, "libtao264")]);
    }

    #[test]
    fn test_create_encoder_by_id_and_name() {
        let mut registry = CodecRegistry::new();
        crate::register_all(&mut registry);
        let enc = registry.create_encoder(CodecId::H264).expect("创建 H.264 编码器失败");
        assert_eq!(enc.codec_id(), CodecId::H264);
        let enc = registry
            .create_encoder_by_name("libtao264")
            .expect("按名称创建编码器失败");
        assert_eq!(enc.name(), "libtao264");
    }

    #[test]
    fn test_unregistered_codec_returns_error() {
        let registry = CodecRegistry::new();
        assert!(matches!(
            registry.create_encoder(CodecId::H264),
            Err(TaoError::CodecNotFound(_))
        ));
    }
}

//! 统一错误类型定义.
//!
//! 编码器各模块共用的错误类型, 通过 `?` 跨模块传播.

use thiserror::Error;

/// tao264 统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数 (配置错误, 在会话建立阶段报告)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作或格式
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 编码过程错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 资源耗尽 (帧缓冲分配失败, 参考帧池溢出)
    #[error("资源耗尽: {0}")]
    ResourceExhausted(String),

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// tao264 统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_uses_readable_message() {
        let err = TaoError::ResourceExhausted("参考帧池已满".into());
        assert_eq!(err.to_string(), "资源耗尽: 参考帧池已满");
    }

    #[test]
    fn test_errors_propagate_with_question_mark() {
        fn check_qp(qp: u8) -> TaoResult<u8> {
            if qp > 51 {
                return Err(TaoError::InvalidArgument(format!("qp={qp} 超出 0..=51")));
            }
            Ok(qp)
        }
        fn open(qp: u8) -> TaoResult<u8> {
            let qp = check_qp(qp)?;
            Ok(qp + 1)
        }
        assert_eq!(open(26).unwrap(), 27);
        assert!(matches!(open(60), Err(TaoError::InvalidArgument(_))));
    }
}

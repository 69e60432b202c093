//! 编码器 trait 定义.
//!
//! 所有编码器实现必须实现 `Encoder` trait.

use tao264_core::TaoResult;

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::frame::VideoFrame;
use crate::packet::Packet;

/// 编码器 trait
///
/// 编码流程:
/// 1. 调用 `open()` 提供流参数 (分辨率、像素格式、帧率)
/// 2. 调用 `send_frame()` 送入原始帧数据
/// 3. 调用 `receive_packet()` 取出压缩数据包, 直到返回 `NeedMoreData`
/// 4. 送入 None 表示编码结束, 之后取空缓存的数据包直到返回 `Eof`
pub trait Encoder: Send {
    /// 获取编码器标识
    fn codec_id(&self) -> CodecId;

    /// 获取编码器名称
    fn name(&self) -> &str;

    /// 使用参数配置编码器
    fn open(&mut self, params: &CodecParameters) -> TaoResult<()>;

    /// 编码器打开后生成的额外数据 (H.264 为 SPS/PPS)
    fn extra_data(&self) -> Option<&[u8]> {
        None
    }

    /// 送入一帧原始数据进行编码
    ///
    /// # 参数
    /// - `frame`: 原始帧数据. `None` 表示刷新 (flush), 取出缓存的数据包.
    ///
    /// # 返回
    /// - `Ok(())`: 帧已接受
    /// - `Err(TaoError::NeedMoreData)`: 编码器内部缓冲区已满, 需要先取出数据包
    fn send_frame(&mut self, frame: Option<&VideoFrame>) -> TaoResult<()>;

    /// 从编码器取出一个压缩数据包
    ///
    /// # 返回
    /// - `Ok(packet)`: 成功取出一个数据包
    /// - `Err(TaoError::NeedMoreData)`: 需要送入更多帧
    /// - `Err(TaoError::Eof)`: 所有数据包已取出
    fn receive_packet(&mut self) -> TaoResult<Packet>;

    /// 刷新编码器, 清空内部状态
    fn flush(&mut self);
}

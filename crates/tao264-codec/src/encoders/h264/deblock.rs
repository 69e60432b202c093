//! 环路滤波接口.
//!
//! 编码器的重建帧必须与解码器输出一致, 因此 slice 头部的
//! disable_deblocking_filter_idc 与参数由滤波器本身给出. 默认的
//! [`NoLoopFilter`] 关闭去块滤波, 重建帧即为参考帧.

use super::frames::YuvPlanes;
use super::macroblock::MbRecord;

/// slice 头部中的去块滤波参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeblockParams {
    /// 0 启用, 1 关闭, 2 不跨 slice 边界
    pub disable_idc: u32,
    pub alpha_c0_offset_div2: i32,
    pub beta_offset_div2: i32,
}

/// 环路滤波器
pub trait LoopFilter: Send + Sync {
    /// 写入 slice 头部的参数
    fn params(&self) -> DeblockParams;

    /// 整帧重建完成后对 `recon` 滤波, `records` 为光栅顺序的宏块记录
    fn filter_frame(&self, records: &[MbRecord], mb_width: usize, recon: &mut YuvPlanes);
}

/// 关闭去块滤波
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoopFilter;

impl LoopFilter for NoLoopFilter {
    fn params(&self) -> DeblockParams {
        DeblockParams {
            disable_idc: 1,
            ..Default::default()
        }
    }

    fn filter_frame(&self, _records: &[MbRecord], _mb_width: usize, _recon: &mut YuvPlanes) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_loop_filter_disables_deblocking() {
        let params = NoLoopFilter.params();
        assert_eq!(params.disable_idc, 1);
        assert_eq!(params.alpha_c0_offset_div2, 0);
        assert_eq!(params.beta_offset_div2, 0);
    }
}

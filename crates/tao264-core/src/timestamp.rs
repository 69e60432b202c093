//! 编码输出的时间戳.
//!
//! 存在 B 帧时编码顺序与显示顺序不同: 输出包的 PTS 沿用输入帧的显示时间,
//! DTS 由 [`DtsGenerator`] 按重排延迟生成, 保证单调递增且不大于 PTS.

use std::collections::VecDeque;

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 解码时间戳生成器
///
/// 前 `delay` 个输出包的 DTS 由最早的输入 PTS 向前外推,
/// 之后每个包的 DTS 取 `delay` 帧之前进入的 PTS.
#[derive(Debug, Clone)]
pub struct DtsGenerator {
    delay: usize,
    /// 按输入顺序记录的 PTS
    input_pts: VecDeque<i64>,
    /// 已输出的包数
    emitted: usize,
    /// 首帧 PTS 与帧间隔 (外推用)
    first_pts: Option<i64>,
    frame_duration: i64,
}

impl DtsGenerator {
    /// 创建生成器, `delay` 为编码顺序相对显示顺序的最大延迟帧数
    pub fn new(delay: usize, frame_duration: i64) -> Self {
        Self {
            delay,
            input_pts: VecDeque::with_capacity(delay + 2),
            emitted: 0,
            first_pts: None,
            frame_duration: frame_duration.max(1),
        }
    }

    /// 记录一个输入帧 (显示顺序) 的 PTS
    pub fn push_input(&mut self, pts: i64) {
        if pts == NOPTS_VALUE {
            return;
        }
        if self.first_pts.is_none() {
            self.first_pts = Some(pts);
        }
        self.input_pts.push_back(pts);
    }

    /// 为下一个输出包生成 DTS
    pub fn next_dts(&mut self) -> i64 {
        let dts = if self.emitted < self.delay {
            match self.first_pts {
                Some(first) => first - (self.delay - self.emitted) as i64 * self.frame_duration,
                None => NOPTS_VALUE,
            }
        } else {
            self.input_pts.pop_front().unwrap_or(NOPTS_VALUE)
        };
        self.emitted += 1;
        dts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dts_without_reorder_equals_pts() {
        let mut generator = DtsGenerator::new(0, 1);
        for pts in 0..4 {
            generator.push_input(pts);
        }
        let dts: Vec<i64> = (0..4).map(|_| generator.next_dts()).collect();
        assert_eq!(dts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_dts_with_one_b_frame_delay() {
        // 显示顺序 I0 B1 P2 -> 编码顺序 I0 P2 B1
        let mut generator = DtsGenerator::new(1, 1);
        for pts in 0..3 {
            generator.push_input(pts);
        }
        let encode_order_pts = [0i64, 2, 1];
        let dts: Vec<i64> = (0..3).map(|_| generator.next_dts()).collect();
        assert_eq!(dts, vec![-1, 0, 1]);
        for (d, p) in dts.iter().zip(encode_order_pts.iter()) {
            assert!(d <= p, "DTS 不应大于 PTS");
        }
    }
}

//! 有理数类型, 用于帧率与时间基.
//!
//! 码率控制按帧率把目标码率换算为每帧比特预算, 时间戳换算依赖时间基.

use std::fmt;

/// 有理数 (分子/分母)
///
/// 帧率 30000/1001 表示 29.97fps, 时间基 1/90000 表示 90kHz 时钟.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

impl Rational {
    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 分母不为 0 且分子为正
    pub const fn is_positive(&self) -> bool {
        self.den != 0 && (self.num > 0) == (self.den > 0) && self.num != 0
    }

    /// 转换为 f64, 分母为 0 时返回 `f64::NAN`
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 约分并保证分母为正
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs()) as i32;
        let sign = self.den.signum();
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 求倒数 (帧率 <-> 帧时长)
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// 把以 `self` 为时间基的值换算到 `target` 时间基, 向零取整
    pub fn rescale(self, value: i64, target: Rational) -> Option<i64> {
        let num = i128::from(value) * i128::from(self.num) * i128::from(target.den);
        let den = i128::from(self.den) * i128::from(target.num);
        if den == 0 {
            return None;
        }
        i64::try_from(num / den).ok()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_keeps_denominator_positive() {
        assert_eq!(Rational::new(30, 60).reduce(), Rational::new(1, 2));
        assert_eq!(Rational::new(3, -6).reduce(), Rational::new(-1, 2));
        assert_eq!(Rational::new(0, 5).reduce(), Rational::new(0, 1));
    }

    #[test]
    fn test_frame_rate_helpers() {
        let fps = Rational::new(30000, 1001);
        assert!(fps.is_positive());
        assert!((fps.to_f64() - 29.97).abs() < 0.01);
        assert_eq!(fps.invert(), Rational::new(1001, 30000));
        assert!(!Rational::UNDEFINED.is_positive());
        assert!(Rational::UNDEFINED.to_f64().is_nan());
    }

    #[test]
    fn test_rescale_between_time_bases() {
        let tb_90k = Rational::new(1, 90000);
        assert_eq!(tb_90k.rescale(90000, Rational::new(1, 1000)), Some(1000));
        assert_eq!(Rational::new(1, 25).rescale(3, tb_90k), Some(10800));
        assert_eq!(tb_90k.rescale(1, Rational::UNDEFINED), None);
    }
}

//! RBSP 比特读取.
//!
//! 只用于回读编码器自身写出的参数集与 slice 头部 (自检与测试),
//! 因此只提供定长字段与 Exp-Golomb 码.

use crate::{TaoError, TaoResult};

/// MSB 优先的比特读取器
///
/// # 示例
/// ```
/// use tao264_core::bitreader::BitReader;
///
/// let data = [0b1010_0110];
/// let mut br = BitReader::new(&data);
/// assert_eq!(br.read_ue().unwrap(), 0);
/// assert_eq!(br.read_ue().unwrap(), 1);
/// assert_eq!(br.read_bits(4).unwrap(), 0b0110);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    /// 下一个待读位的绝对位置
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 剩余可读位数
    pub fn bits_left(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    pub fn read_bit(&mut self) -> TaoResult<u32> {
        let byte = *self.data.get(self.pos >> 3).ok_or(TaoError::Eof)?;
        let bit = (byte >> (7 - (self.pos & 7))) & 1;
        self.pos += 1;
        Ok(u32::from(bit))
    }

    pub fn read_flag(&mut self) -> TaoResult<bool> {
        Ok(self.read_bit()? == 1)
    }

    /// 读取 `n` 位 (最多 32 位)
    pub fn read_bits(&mut self, n: u32) -> TaoResult<u32> {
        if n > 32 {
            return Err(TaoError::InvalidArgument(format!("read_bits: n={n} 超过 32 位")));
        }
        if n as usize > self.bits_left() {
            return Err(TaoError::Eof);
        }
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value as u32)
    }

    /// ue(v)
    pub fn read_ue(&mut self) -> TaoResult<u32> {
        let mut zeros = 0u32;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(TaoError::InvalidData("Exp-Golomb 前导零超过 31".into()));
            }
        }
        let suffix = self.read_bits(zeros)?;
        Ok(((1u64 << zeros) - 1 + u64::from(suffix)) as u32)
    }

    /// se(v): 1, 2, 3, 4 映射为 +1, -1, +2, -2
    pub fn read_se(&mut self) -> TaoResult<i32> {
        let code = self.read_ue()?;
        let magnitude = code.div_ceil(2) as i32;
        Ok(if code & 1 == 1 { magnitude } else { -magnitude })
    }
}

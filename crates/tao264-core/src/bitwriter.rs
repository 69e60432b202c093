//! 比特流写入器.
//!
//! 按大端位序 (MSB first) 向字节缓冲区写入 RBSP 数据, 支持定长字段、
//! Exp-Golomb 码与 RBSP 尾部比特. 以 [`BitWriter::new_escaped`] 创建时,
//! 每个完成的字节在落盘时执行 NAL 防竞争 (emulation prevention) 处理:
//! 连续两个 0x00 之后若下一个字节 <= 0x03, 先插入 0x03.

/// 比特流写入器
///
/// # 示例
/// ```
/// use tao264_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new_escaped();
/// bw.write_bytes(&[0x00, 0x00, 0x00]);
/// assert_eq!(bw.finish(), vec![0x00, 0x00, 0x03, 0x00]);
/// ```
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节 (正在填充)
    current_byte: u8,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
    /// 是否执行防竞争字节插入
    escape: bool,
    /// 末尾连续 0x00 的个数 (仅 escape 模式使用)
    zero_run: u8,
    /// 已插入的防竞争字节数
    escaped_bytes: usize,
}

impl BitWriter {
    /// 创建不做防竞争处理的写入器 (纯 RBSP)
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// 以指定容量创建写入器
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            current_byte: 0,
            bit_count: 0,
            escape: false,
            zero_run: 0,
            escaped_bytes: 0,
        }
    }

    /// 创建带防竞争处理的写入器, 输出即为 NAL 载荷 (EBSP)
    pub fn new_escaped() -> Self {
        Self {
            escape: true,
            ..Self::with_capacity(0)
        }
    }

    /// 以指定容量创建带防竞争处理的写入器
    pub fn escaped_with_capacity(capacity: usize) -> Self {
        Self {
            escape: true,
            ..Self::with_capacity(capacity)
        }
    }

    /// 已写入的有效位数 (不含防竞争字节)
    pub fn bits_written(&self) -> usize {
        (self.data.len() - self.escaped_bytes) * 8 + self.bit_count as usize
    }

    /// 已插入的防竞争字节数
    pub fn escaped_bytes(&self) -> usize {
        self.escaped_bytes
    }

    /// 是否位于字节边界
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_count == 0
    }

    fn push_byte(&mut self, byte: u8) {
        if self.escape {
            if self.zero_run >= 2 && byte <= 0x03 {
                self.data.push(0x03);
                self.escaped_bytes += 1;
                self.zero_run = 0;
            }
            if byte == 0 {
                self.zero_run += 1;
            } else {
                self.zero_run = 0;
            }
        }
        self.data.push(byte);
    }

    /// 写入 1 个位
    pub fn write_bit(&mut self, bit: u32) {
        self.current_byte = (self.current_byte << 1) | (bit & 1) as u8;
        self.bit_count += 1;
        if self.bit_count >= 8 {
            let byte = self.current_byte;
            self.current_byte = 0;
            self.bit_count = 0;
            self.push_byte(byte);
        }
    }

    /// 写入 1 位标志
    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(u32::from(flag));
    }

    /// 写入 N 个位 (最多 32 位), 值的低 N 位高位在前
    pub fn write_bits(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32, "write_bits: n={} 超过 32 位", n);
        let mut remaining = n;
        while remaining > 0 {
            let available = 8 - self.bit_count as u32;
            let to_write = remaining.min(available);
            let shift = remaining - to_write;
            let mask = (1u32 << to_write) - 1;
            let bits = ((value >> shift) & mask) as u8;

            self.current_byte = if to_write >= 8 {
                bits
            } else {
                (self.current_byte << to_write) | bits
            };
            self.bit_count += to_write as u8;
            if self.bit_count >= 8 {
                let byte = self.current_byte;
                self.current_byte = 0;
                self.bit_count = 0;
                self.push_byte(byte);
            }
            remaining -= to_write;
        }
    }

    /// 写入无符号 Exp-Golomb 码 ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros();
        // len - 1 个前导零, 随后 len 位的 code
        self.write_bits(0, len - 1);
        if len > 32 {
            self.write_bits((code >> 32) as u32, len - 32);
            self.write_bits(code as u32, 32);
        } else {
            self.write_bits(code as u32, len);
        }
    }

    /// 写入有符号 Exp-Golomb 码 se(v)
    pub fn write_se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.write_ue(mapped);
    }

    /// 写入 rbsp_trailing_bits: 一个 1 后以 0 补齐到字节边界
    pub fn write_trailing_bits(&mut self) {
        self.write_bit(1);
        self.flush();
    }

    /// 以 1 补齐到字节边界 (cabac_alignment_one_bit)
    pub fn align_with_ones(&mut self) {
        while self.bit_count != 0 {
            self.write_bit(1);
        }
    }

    /// 以 0 补齐到字节边界
    ///
    /// NAL 单元收尾前必须调用.
    pub fn flush(&mut self) {
        if self.bit_count > 0 {
            let pad = 8 - self.bit_count;
            let byte = self.current_byte << pad;
            self.current_byte = 0;
            self.bit_count = 0;
            self.push_byte(byte);
        }
    }

    /// 写入完整字节; 未对齐时先以 0 补齐
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.flush();
        if self.escape {
            for &b in bytes {
                self.push_byte(b);
            }
        } else {
            self.data.extend_from_slice(bytes);
        }
    }

    /// 完成写入, 返回字节数据 (自动补齐字节边界)
    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.data
    }

    /// 获取当前已完成的字节数据引用 (不包括正在填充的字节)
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// ue(v) 的编码位数
pub fn ue_size(value: u32) -> u32 {
    let code = u64::from(value) + 1;
    2 * (64 - code.leading_zeros()) - 1
}

/// se(v) 的编码位数
pub fn se_size(value: i32) -> u32 {
    let mapped = if value > 0 {
        (value as u32) * 2 - 1
    } else {
        value.unsigned_abs() * 2
    };
    ue_size(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitreader::BitReader;

    #[test]
    fn test_write_bits_basic() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b1011, 4);
        bw.write_bits(0b0001, 4);
        assert_eq!(bw.finish(), vec![0b10110001]);
    }

    #[test]
    fn test_write_bits_32_bit() {
        let mut bw = BitWriter::new();
        bw.write_bits(0xFF00FF00, 32);
        assert_eq!(bw.finish(), vec![0xFF, 0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_write_ue_se_readback() {
        let mut bw = BitWriter::new();
        for v in [0u32, 1, 2, 3, 7, 8, 255, 65535] {
            bw.write_ue(v);
        }
        for v in [0i32, 1, -1, 2, -2, 100, -100] {
            bw.write_se(v);
        }
        bw.write_trailing_bits();
        let data = bw.finish();

        let mut br = BitReader::new(&data);
        for v in [0u32, 1, 2, 3, 7, 8, 255, 65535] {
            assert_eq!(br.read_ue().unwrap(), v, "ue 回读不一致");
        }
        for v in [0i32, 1, -1, 2, -2, 100, -100] {
            assert_eq!(br.read_se().unwrap(), v, "se 回读不一致");
        }
        assert_eq!(br.read_bit().unwrap(), 1, "尾部比特应以 1 开始");
    }

    #[test]
    fn test_ue_size_matches_written_bits() {
        for v in [0u32, 1, 5, 30, 1000] {
            let mut bw = BitWriter::new();
            bw.write_ue(v);
            assert_eq!(bw.bits_written() as u32, ue_size(v));
        }
        assert_eq!(se_size(-3), ue_size(6));
    }

    #[test]
    fn test_escape_three_zero_bytes() {
        let mut bw = BitWriter::new_escaped();
        bw.write_bytes(&[0x00, 0x00, 0x00]);
        assert_eq!(bw.finish(), vec![0x00, 0x00, 0x03, 0x00]);
    }

    #[test]
    fn test_escape_applies_to_bit_level_writes() {
        let mut bw = BitWriter::new_escaped();
        bw.write_bits(0, 16);
        bw.write_bits(0x01, 8);
        bw.write_bits(0x00, 8);
        bw.write_bits(0x00, 8);
        bw.write_bits(0x04, 8);
        assert_eq!(bw.escaped_bytes(), 1);
        assert_eq!(bw.bits_written(), 48);
        assert_eq!(bw.finish(), vec![0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_plain_writer_never_escapes() {
        let mut bw = BitWriter::new();
        bw.write_bytes(&[0x00, 0x00, 0x01]);
        assert_eq!(bw.finish(), vec![0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_align_with_ones() {
        let mut bw = BitWriter::new();
        bw.write_bits(0, 3);
        bw.align_with_ones();
        assert!(bw.is_byte_aligned());
        assert_eq!(bw.finish(), vec![0b0001_1111]);
    }
}

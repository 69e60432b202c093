//! CABAC 二进制算术编码引擎与上下文模型库.
//!
//! 编码器寄存器 (low, range) 与未决位计数遵循标准的 EncodeDecision /
//! EncodeBypass / EncodeTerminate 流程. 上下文模型库每个 slice 独立初始化,
//! 不在 slice 之间共享, 因此多个 slice 任务可以并行编码.

use tao264_core::bitwriter::BitWriter;

use super::cabac_tables::{
    CABAC_CONTEXT_COUNT, CABAC_INIT_I, CABAC_INIT_PB, RANGE_TAB_LPS, TRANS_IDX_LPS,
};

/// 单个上下文模型: 概率状态索引与最可能符号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextModel {
    /// pStateIdx (0..=63)
    pub state: u8,
    /// valMPS (0 或 1)
    pub mps: u8,
}

impl ContextModel {
    /// 由 (m, n) 初始化参数与 slice QP 计算初始状态
    pub fn from_init(m: i8, n: i8, qp: i32) -> Self {
        let qp = qp.clamp(0, 51);
        let pre = (((i32::from(m) * qp) >> 4) + i32::from(n)).clamp(1, 126);
        if pre <= 63 {
            Self {
                state: (63 - pre) as u8,
                mps: 0,
            }
        } else {
            Self {
                state: (pre - 64) as u8,
                mps: 1,
            }
        }
    }
}

/// 上下文模型库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBank {
    models: Box<[ContextModel; CABAC_CONTEXT_COUNT]>,
}

impl ContextBank {
    /// 按 slice 类型、cabac_init_idc 与 slice QP 初始化
    ///
    /// I slice 使用独立的初始化表, P/B slice 按 `cabac_init_idc` (0..=2) 选表.
    pub fn new(intra_slice: bool, cabac_init_idc: u8, qp: i32) -> Self {
        let table = if intra_slice {
            &CABAC_INIT_I
        } else {
            &CABAC_INIT_PB[usize::from(cabac_init_idc.min(2))]
        };
        let mut models = Box::new([ContextModel::default(); CABAC_CONTEXT_COUNT]);
        for (model, &[m, n]) in models.iter_mut().zip(table.iter()) {
            *model = ContextModel::from_init(m, n, qp);
        }
        Self { models }
    }

    /// 读取上下文状态
    pub fn get(&self, ctx: usize) -> ContextModel {
        self.models[ctx]
    }
}

/// CABAC 编码器
///
/// 持有承载 slice 数据的 [`BitWriter`], 在 `encode_terminate(1)` 之后
/// 通过 [`CabacEncoder::finish`] 取回.
pub struct CabacEncoder {
    writer: BitWriter,
    bank: ContextBank,
    low: u32,
    range: u32,
    outstanding: u32,
    first_bit: bool,
    closed: bool,
    bins: u64,
}

impl CabacEncoder {
    /// 在已写入 slice 头并以 1 对齐的写入器上启动算术编码
    pub fn new(writer: BitWriter, bank: ContextBank) -> Self {
        debug_assert!(writer.is_byte_aligned(), "CABAC 数据必须从字节边界开始");
        Self {
            writer,
            bank,
            low: 0,
            range: 510,
            outstanding: 0,
            first_bit: true,
            closed: false,
            bins: 0,
        }
    }

    /// 上下文模型库
    pub fn contexts(&self) -> &ContextBank {
        &self.bank
    }

    /// 已编码的 bin 数
    pub fn bin_count(&self) -> u64 {
        self.bins
    }

    /// 已确定输出的位数估计 (含未决位)
    pub fn bits_written(&self) -> usize {
        self.writer.bits_written() + self.outstanding as usize
    }

    /// 算术码流是否已经终止
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn put_bit(&mut self, bit: u32) {
        if self.first_bit {
            self.first_bit = false;
        } else {
            self.writer.write_bit(bit);
        }
        while self.outstanding > 0 {
            self.writer.write_bit(1 - bit);
            self.outstanding -= 1;
        }
    }

    fn renorm(&mut self) {
        while self.range < 256 {
            if self.low < 256 {
                self.put_bit(0);
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit(1);
            } else {
                self.low -= 256;
                self.outstanding += 1;
            }
            self.range <<= 1;
            self.low <<= 1;
        }
    }

    /// 以上下文 `ctx` 编码一个 bin 并更新其概率状态
    pub fn encode_decision(&mut self, ctx: usize, bin: u32) {
        debug_assert!(ctx < CABAC_CONTEXT_COUNT, "上下文索引越界: {}", ctx);
        debug_assert!(!self.closed, "CABAC 码流已终止");
        let model = &mut self.bank.models[ctx];
        let q = ((self.range >> 6) & 3) as usize;
        let r_lps = u32::from(RANGE_TAB_LPS[usize::from(model.state)][q]);
        self.range -= r_lps;
        if (bin & 1) as u8 != model.mps {
            self.low += self.range;
            self.range = r_lps;
            if model.state == 0 {
                model.mps = 1 - model.mps;
            }
            model.state = TRANS_IDX_LPS[usize::from(model.state)];
        } else {
            model.state = (model.state + 1).min(62);
        }
        self.bins += 1;
        self.renorm();
    }

    /// 以等概率编码一个 bin
    pub fn encode_bypass(&mut self, bin: u32) {
        debug_assert!(!self.closed, "CABAC 码流已终止");
        self.low <<= 1;
        if bin & 1 != 0 {
            self.low += self.range;
        }
        if self.low >= 1024 {
            self.put_bit(1);
            self.low -= 1024;
        } else if self.low < 512 {
            self.put_bit(0);
        } else {
            self.low -= 512;
            self.outstanding += 1;
        }
        self.bins += 1;
    }

    /// 以等概率编码 `value` 的低 `n` 位, 高位在前
    pub fn encode_bypass_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            self.encode_bypass((value >> i) & 1);
        }
    }

    /// 以 k 阶 Exp-Golomb 旁路编码 (UEGk 后缀)
    pub fn encode_exp_golomb_bypass(&mut self, mut value: u32, mut k: u32) {
        while value >= (1 << k) {
            self.encode_bypass(1);
            value -= 1 << k;
            k += 1;
        }
        self.encode_bypass(0);
        self.encode_bypass_bits(value, k);
    }

    /// 编码终止 bin; `bin = 1` 时冲刷寄存器并关闭码流
    ///
    /// 冲刷写出的最后一位即 rbsp_stop_one_bit, 之后以 0 对齐到字节边界.
    pub fn encode_terminate(&mut self, bin: u32) {
        debug_assert!(!self.closed, "CABAC 码流已终止");
        self.range -= 2;
        self.bins += 1;
        if bin != 0 {
            self.low += self.range;
            self.range = 2;
            self.renorm();
            self.put_bit((self.low >> 9) & 1);
            self.writer.write_bits(((self.low >> 7) & 3) | 1, 2);
            self.writer.flush();
            self.closed = true;
        } else {
            self.renorm();
        }
    }

    /// 取回写入器 (须在 `encode_terminate(1)` 之后调用)
    pub fn finish(self) -> BitWriter {
        debug_assert!(self.closed, "CABAC 码流尚未终止");
        self.writer
    }
}

/// 测试用 CABAC 解码器, 按标准的 DecodeDecision / DecodeBypass / DecodeTerminate 实现
#[cfg(test)]
pub(crate) struct CabacDecoder<'a> {
    reader: tao264_core::bitreader::BitReader<'a>,
    bank: ContextBank,
    range: u32,
    offset: u32,
}

#[cfg(test)]
impl<'a> CabacDecoder<'a> {
    pub(crate) fn new(data: &'a [u8], bank: ContextBank) -> Self {
        let mut reader = tao264_core::bitreader::BitReader::new(data);
        let offset = reader.read_bits(9).unwrap_or(0);
        Self {
            reader,
            bank,
            range: 510,
            offset,
        }
    }

    fn next_bit(&mut self) -> u32 {
        self.reader.read_bit().unwrap_or(0)
    }

    pub(crate) fn decode_decision(&mut self, ctx: usize) -> u32 {
        let model = &mut self.bank.models[ctx];
        let q = ((self.range >> 6) & 3) as usize;
        let r_lps = u32::from(RANGE_TAB_LPS[usize::from(model.state)][q]);
        self.range -= r_lps;
        let bin;
        if self.offset >= self.range {
            bin = u32::from(1 - model.mps);
            self.offset -= self.range;
            self.range = r_lps;
            if model.state == 0 {
                model.mps = 1 - model.mps;
            }
            model.state = TRANS_IDX_LPS[usize::from(model.state)];
        } else {
            bin = u32::from(model.mps);
            model.state = (model.state + 1).min(62);
        }
        while self.range < 256 {
            self.range <<= 1;
            self.offset = (self.offset << 1) | self.next_bit();
        }
        bin
    }

    pub(crate) fn decode_bypass(&mut self) -> u32 {
        self.offset = (self.offset << 1) | self.next_bit();
        if self.offset >= self.range {
            self.offset -= self.range;
            1
        } else {
            0
        }
    }

    pub(crate) fn decode_bypass_bits(&mut self, n: u32) -> u32 {
        (0..n).fold(0, |acc, _| (acc << 1) | self.decode_bypass())
    }

    pub(crate) fn decode_exp_golomb_bypass(&mut self, mut k: u32) -> u32 {
        let mut value = 0u32;
        while self.decode_bypass() == 1 {
            value += 1 << k;
            k += 1;
        }
        value + self.decode_bypass_bits(k)
    }

    pub(crate) fn decode_terminate(&mut self) -> u32 {
        self.range -= 2;
        if self.offset >= self.range {
            1
        } else {
            while self.range < 256 {
                self.range <<= 1;
                self.offset = (self.offset << 1) | self.next_bit();
            }
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 简单的线性同余伪随机序列, 保证测试可复现
    fn pseudo_random_bins(count: usize, seed: u32) -> Vec<(usize, u32)> {
        let mut x = seed;
        (0..count)
            .map(|_| {
                x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                let ctx = ((x >> 8) % 40) as usize + 60;
                // 偏置分布: 约 3/4 为 0
                let bin = u32::from((x >> 20) & 3 == 0);
                (ctx, bin)
            })
            .collect()
    }

    fn encode_sequence(bins: &[(usize, u32)], qp: i32) -> Vec<u8> {
        let mut enc = CabacEncoder::new(BitWriter::new(), ContextBank::new(false, 0, qp));
        for &(ctx, bin) in bins {
            enc.encode_decision(ctx, bin);
        }
        enc.encode_terminate(1);
        enc.finish().finish()
    }

    #[test]
    fn test_context_init_formula() {
        // m=0, n=41 -> preCtxState=41 -> state 22, mps 0
        let model = ContextModel::from_init(0, 41, 26);
        assert_eq!(model, ContextModel { state: 22, mps: 0 });
        // m=20, n=-15, qp=26: (520 >> 4) - 15 = 17 -> state 46, mps 0
        let model = ContextModel::from_init(20, -15, 26);
        assert_eq!(model, ContextModel { state: 46, mps: 0 });
        // preCtxState 上限为 126 -> state 62, mps 1
        let model = ContextModel::from_init(0, 127, 26);
        assert_eq!(model, ContextModel { state: 62, mps: 1 });
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let bins = pseudo_random_bins(2000, 7);
        let a = encode_sequence(&bins, 26);
        let b = encode_sequence(&bins, 26);
        assert_eq!(a, b, "相同输入两次编码的输出必须一致");
        assert!(!a.is_empty());
    }

    #[test]
    fn test_decision_round_trip_with_reference_decoder() {
        let bins = pseudo_random_bins(3000, 99);
        let data = encode_sequence(&bins, 30);
        let mut dec = CabacDecoder::new(&data, ContextBank::new(false, 0, 30));
        for (i, &(ctx, bin)) in bins.iter().enumerate() {
            assert_eq!(dec.decode_decision(ctx), bin, "第 {i} 个 bin 解码不一致");
        }
        assert_eq!(dec.decode_terminate(), 1, "终止 bin 应为 1");
    }

    #[test]
    fn test_bypass_and_terminate_round_trip() {
        let mut enc = CabacEncoder::new(BitWriter::new(), ContextBank::new(true, 0, 26));
        enc.encode_decision(60, 1);
        enc.encode_bypass_bits(0b1011_0110, 8);
        enc.encode_exp_golomb_bypass(37, 3);
        enc.encode_exp_golomb_bypass(0, 0);
        enc.encode_terminate(0);
        enc.encode_decision(61, 0);
        enc.encode_terminate(1);
        assert!(enc.is_closed());
        let data = enc.finish().finish();

        let mut dec = CabacDecoder::new(&data, ContextBank::new(true, 0, 26));
        assert_eq!(dec.decode_decision(60), 1);
        assert_eq!(dec.decode_bypass_bits(8), 0b1011_0110);
        assert_eq!(dec.decode_exp_golomb_bypass(3), 37);
        assert_eq!(dec.decode_exp_golomb_bypass(0), 0);
        assert_eq!(dec.decode_terminate(), 0);
        assert_eq!(dec.decode_decision(61), 0);
        assert_eq!(dec.decode_terminate(), 1);
    }

    #[test]
    fn test_flush_ends_with_stop_bit_and_alignment() {
        let mut enc = CabacEncoder::new(BitWriter::new(), ContextBank::new(true, 0, 26));
        enc.encode_terminate(1);
        let data = enc.finish().finish();
        let last = *data.last().expect("冲刷后至少输出一个字节");
        assert_ne!(last, 0, "最后一个字节必须包含 rbsp_stop_one_bit");
    }

    #[test]
    fn test_adaptation_moves_towards_mps() {
        let mut enc = CabacEncoder::new(BitWriter::new(), ContextBank::new(true, 0, 26));
        let before = enc.contexts().get(60);
        for _ in 0..10 {
            enc.encode_decision(60, u32::from(before.mps));
        }
        let after = enc.contexts().get(60);
        assert_eq!(after.mps, before.mps);
        assert_eq!(after.state, (before.state + 10).min(62));
    }
}

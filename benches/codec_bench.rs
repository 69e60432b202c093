//! tao264 性能基准测试.
//!
//! 覆盖 CABAC 算术编码、4x4 变换量化与整帧编码.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tao264::codec::encoders::h264::cabac::{CabacEncoder, ContextBank};
use tao264::codec::encoders::h264::transform::{
    BlockKind, QuantMode, dequantize_inverse_transform, transform_quantize,
};
use tao264::codec::encoders::h264::{H264Encoder, H264EncoderConfig};
use tao264::codec::{CodecId, CodecParameters, Encoder, VideoCodecParams, VideoFrame};
use tao264::core::bitwriter::BitWriter;
use tao264::core::{PixelFormat, Rational};

/// 伪随机 bin 序列, 约 3/4 为 0
fn make_bins(count: usize) -> Vec<u32> {
    let mut state = 0x1234_5678u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            u32::from(state & 3 == 0)
        })
        .collect()
}

fn make_frame(width: u32, height: u32, pts: i64) -> VideoFrame {
    let mut frame = VideoFrame::alloc(width, height, PixelFormat::Yuv420p);
    for plane in 0..3 {
        let stride = frame.linesize[plane];
        for (i, v) in frame.data[plane].iter_mut().enumerate() {
            let (x, y) = ((i % stride) as f64, (i / stride) as f64);
            let t = pts as f64 * 1.5;
            *v = if plane == 0 {
                (128.0 + 60.0 * ((x + t) * 0.21).sin() * (y * 0.17).cos()) as u8
            } else {
                (128.0 + 20.0 * ((x + y) * 0.05).sin()) as u8
            };
        }
    }
    frame.pts = pts;
    frame.duration = 1;
    frame.time_base = Rational::new(1, 25);
    frame
}

fn bench_cabac_encode(c: &mut Criterion) {
    let bins = make_bins(100_000);
    c.bench_function("cabac_encode_100k_bins", |b| {
        b.iter(|| {
            let mut cabac = CabacEncoder::new(BitWriter::new(), ContextBank::new(false, 0, 26));
            for (i, &bin) in bins.iter().enumerate() {
                if i % 8 == 7 {
                    cabac.encode_bypass(bin);
                } else {
                    cabac.encode_decision(60 + i % 16, bin);
                }
            }
            cabac.encode_terminate(1);
            black_box(cabac.finish().finish());
        });
    });
}

fn bench_transform_4x4(c: &mut Criterion) {
    let residual: Vec<i32> = (0..16).map(|i| (i * 7 % 23) - 11).collect();
    c.bench_function("transform_quant_4x4", |b| {
        b.iter(|| {
            let q = transform_quantize(black_box(&residual), 26, BlockKind::Luma4x4, QuantMode::INTER);
            black_box(dequantize_inverse_transform(&q, 26, false));
        });
    });
}

fn bench_encode_frames(c: &mut Criterion) {
    let params = CodecParameters::new_video(
        CodecId::H264,
        VideoCodecParams {
            width: 320,
            height: 240,
            pixel_format: PixelFormat::Yuv420p,
            frame_rate: Rational::new(25, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        },
    );
    let frames: Vec<VideoFrame> = (0..8).map(|i| make_frame(320, 240, i)).collect();

    let mut group = c.benchmark_group("h264_encode_320x240");
    group.sample_size(10);
    for (name, slice_count, threads) in [("1slice", 1, 0), ("4slices", 4, 4)] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut enc = H264Encoder::with_config(H264EncoderConfig {
                    slice_count,
                    threads,
                    ..H264EncoderConfig::default()
                });
                enc.open(&params).unwrap();
                for frame in &frames {
                    enc.send_frame(Some(frame)).unwrap();
                }
                enc.send_frame(None).unwrap();
                let mut bytes = 0;
                while let Ok(pkt) = enc.receive_packet() {
                    bytes += pkt.data.len();
                }
                black_box(bytes);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cabac_encode,
    bench_transform_4x4,
    bench_encode_frames
);
criterion_main!(benches);

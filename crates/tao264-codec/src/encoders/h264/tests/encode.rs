use tao264_core::{PixelFormat, TaoError};

use crate::encoder::Encoder;
use crate::frame::VideoFrame;

use super::super::macroblock::MbType;
use super::super::{H264Encoder, H264EncoderConfig};
use super::helpers::*;

#[test]
fn test_flat_frame_encodes_as_single_dc_idr_slice() {
    let config = H264EncoderConfig {
        compute_psnr: true,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let packets = encode_all(&mut enc, &[flat_frame(32, 32, 0, 128)]);
    assert_eq!(packets.len(), 1);
    let slices: Vec<_> = split_annex_b(&packets[0].data)
        .into_iter()
        .filter(|n| nal_type(n) == 5)
        .collect();
    assert_eq!(slices.len(), 1, "一帧一个 IDR slice");

    let stats = enc.last_frame_stats().expect("帧统计");
    assert_eq!(stats.mb.mb_count, 4);
    assert_eq!(stats.mb.mb_types[MbType::I16x16.index()], 4);
    assert_eq!(stats.psnr, Some([100.0; 3]), "平坦图像无残差即可精确重建");
}

#[test]
fn test_static_sequence_p_frames_are_small() {
    let mut enc = open_encoder(base_config(), 64, 64);
    let frames: Vec<_> = (0..4).map(|i| textured_frame(64, 64, i, 0.0)).collect();
    let packets = encode_all(&mut enc, &frames);
    assert_eq!(packets.len(), 4);
    let idr = packets[0].data.len();
    for p in &packets[1..] {
        assert!(p.data.len() * 4 < idr, "静止 P 帧 {} 字节, IDR {} 字节", p.data.len(), idr);
    }
    let stats = enc.stats().expect("会话统计");
    assert_eq!(stats.totals[1].frames, 3);
    let skips = stats.totals[1].mb.mb_types[MbType::PSkip.index()];
    assert!(skips >= 3 * 16 / 2, "静止内容应以 P_Skip 为主, 实际 {skips}");
}

#[test]
fn test_moving_sequence_quality_with_b_frames() {
    let config = H264EncoderConfig {
        bframes: 2,
        lookahead: 3,
        compute_psnr: true,
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 48);
    let frames: Vec<_> = (0..7).map(|i| textured_frame(64, 48, i, i as f64 * 1.5)).collect();
    let packets = encode_all(&mut enc, &frames);
    assert_eq!(packets.len(), 7);
    let stats = enc.stats().expect("会话统计");
    assert_eq!(stats.totals[2].frames, 4, "7 帧中 4 个 B 帧");
    for t in &stats.totals {
        if t.psnr_frames > 0 {
            let y = t.psnr_sum[0] / t.psnr_frames as f64;
            assert!(y > 32.0, "平均亮度 PSNR {y:.2} 过低");
        }
    }
}

#[test]
fn test_lossless_session_reconstructs_exactly() {
    let config = H264EncoderConfig {
        lossless: true,
        compute_psnr: true,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    assert_eq!(enc.parameter_sets().expect("参数集").0.profile_idc, 244);
    let frames: Vec<_> = (0..3).map(|i| textured_frame(32, 32, i, i as f64 * 3.0)).collect();
    encode_all(&mut enc, &frames);
    let stats = enc.stats().expect("会话统计");
    for t in stats.totals.iter().filter(|t| t.frames > 0) {
        assert_eq!(t.psnr_sum[0], 100.0 * t.psnr_frames as f64, "无损重建与源完全一致");
        assert_eq!(t.psnr_sum[1], 100.0 * t.psnr_frames as f64);
    }
}

#[test]
fn test_abr_raises_qp_under_tight_budget() {
    let config = H264EncoderConfig {
        bitrate: Some(8_000),
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 64);
    let mut qps = Vec::new();
    for i in 0..8 {
        let frame = textured_frame(64, 64, i, i as f64 * 3.0);
        enc.send_frame(Some(&frame)).expect("送入帧");
        qps.push(enc.last_frame_stats().expect("帧统计").qp);
    }
    assert_eq!(qps[0], 26 - 3, "首帧 IDR 使用配置 QP 加 I 帧偏移");
    assert!(qps[7] > qps[1], "码率不足时 QP 应上升: {:?}", qps);
    // 去掉 IDR 的 -3 偏移后比较基准 QP, 包括 IDR 到首个 P 帧
    let base: Vec<u8> = qps
        .iter()
        .enumerate()
        .map(|(i, &q)| if i == 0 { q + 3 } else { q })
        .collect();
    assert!(base.windows(2).all(|w| w[1] <= w[0] + 4), "单帧 QP 变化受限: {:?}", qps);
    assert!(qps[1] <= 30, "首个 P 帧不能直接跳到上限: {:?}", qps);
}

#[test]
fn test_rgb_gray_matches_yuv_gray() {
    let mut yuv = open_encoder(base_config(), 32, 32);
    let yuv_packets = encode_all(&mut yuv, &[flat_frame(32, 32, 0, 128)]);

    let mut rgb = H264Encoder::with_config(base_config());
    rgb.open(&video_params(32, 32, PixelFormat::Rgb24)).expect("打开编码器");
    let mut frame = VideoFrame::alloc(32, 32, PixelFormat::Rgb24);
    frame.data[0].fill(128);
    frame.pts = 0;
    let rgb_packets = encode_all(&mut rgb, &[frame]);

    assert_eq!(rgb_packets[0].data, yuv_packets[0].data, "BT.601 灰色映射到 (128, 128, 128)");
}

#[test]
fn test_variable_qp_encodes_mixed_content() {
    let config = H264EncoderConfig {
        variable_qp: true,
        compute_psnr: true,
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 64);
    let frame = yuv_frame(64, 64, 0, |p, x, y| {
        let limit = if p == 0 { 32 } else { 16 };
        if x < limit {
            128
        } else {
            (((x * 37) ^ (y * 91)) & 0xFF) as u8
        }
    });
    let packets = encode_all(&mut enc, &[frame]);
    assert_eq!(packets.len(), 1);
    let stats = enc.last_frame_stats().expect("帧统计");
    assert_eq!(stats.mb.mb_count, 16);
    assert!(stats.psnr.expect("PSNR")[0] > 20.0);
}

#[test]
fn test_encoder_state_errors() {
    let mut enc = H264Encoder::with_config(base_config());
    let frame = flat_frame(32, 32, 0, 128);
    assert!(matches!(enc.send_frame(Some(&frame)), Err(TaoError::Codec(_))));
    assert!(matches!(enc.receive_packet(), Err(TaoError::Codec(_))));

    assert!(matches!(
        enc.open(&video_params(0, 32, PixelFormat::Yuv420p)),
        Err(TaoError::InvalidArgument(_))
    ));
    assert!(matches!(
        enc.open(&video_params(33, 32, PixelFormat::Yuv420p)),
        Err(TaoError::InvalidArgument(_))
    ));
    assert!(matches!(
        enc.open(&video_params(32, 32, PixelFormat::None)),
        Err(TaoError::Unsupported(_))
    ));

    enc.set_config(H264EncoderConfig {
        qp: 60,
        ..base_config()
    });
    assert!(matches!(
        enc.open(&video_params(32, 32, PixelFormat::Yuv420p)),
        Err(TaoError::InvalidArgument(_))
    ));

    enc.set_config(base_config());
    enc.open(&video_params(32, 32, PixelFormat::Yuv420p)).expect("打开编码器");
    assert!(matches!(enc.receive_packet(), Err(TaoError::NeedMoreData)));
    let wrong = flat_frame(48, 32, 0, 128);
    assert!(matches!(enc.send_frame(Some(&wrong)), Err(TaoError::InvalidArgument(_))));
}

#[test]
fn test_odd_visible_size_is_cropped() {
    let mut enc = open_encoder(base_config(), 40, 24);
    let sps = enc.parameter_sets().expect("参数集").0.clone();
    assert_eq!((sps.mb_width, sps.mb_height), (3, 2));
    assert_eq!((sps.crop_right, sps.crop_bottom), (4, 4));
    let packets = encode_all(&mut enc, &[textured_frame(40, 24, 0, 0.0)]);
    assert_eq!(packets.len(), 1);
}

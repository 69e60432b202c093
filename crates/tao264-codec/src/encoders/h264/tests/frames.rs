use crate::encoder::Encoder;
use crate::frame::PictureType;

use super::super::direct::{BiPredTables, TemporalDirect};
use super::super::frames::FrameType;
use super::super::macroblock::{MbType, REF_NOT_USED};
use super::super::{BAdapt, H264EncoderConfig};
use super::helpers::*;

#[test]
fn test_packets_follow_encode_order_with_monotonic_dts() {
    let config = H264EncoderConfig {
        bframes: 2,
        lookahead: 3,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let frames: Vec<_> = (0..7).map(|i| textured_frame(32, 32, i, i as f64)).collect();
    let packets = encode_all(&mut enc, &frames);

    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 3, 1, 2, 6, 4, 5]);
    let keyframes: Vec<bool> = packets.iter().map(|p| p.is_keyframe).collect();
    assert_eq!(keyframes, vec![true, false, false, false, false, false, false]);

    assert!(packets.windows(2).all(|w| w[0].dts < w[1].dts), "DTS 必须严格递增");
    assert!(packets.iter().all(|p| p.dts <= p.pts), "DTS 不能大于 PTS");
    assert_eq!(packets[0].dts, -1);
}

#[test]
fn test_ipb_direct_uses_scaled_col_motion() {
    // 显示顺序 I0 B1 P2, 编码顺序 I0 P2 B1; 内容每帧平移 2 像素
    let config = H264EncoderConfig {
        bframes: 1,
        lookahead: 2,
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 64);
    let session = enc.session.as_mut().expect("会话");
    let collab = &enc.collab;
    for i in 0..3 {
        session
            .intake(collab, &textured_frame(64, 64, i, i as f64 * 2.0))
            .expect("输入帧");
    }
    session.pools.promote(&[FrameType::Idr]).expect("I");
    let i_frame = session.pools.next_ready().expect("就绪 I");
    session.encode_frame(collab, i_frame).expect("编码 I");
    session.pools.promote(&[FrameType::B, FrameType::P]).expect("B P");
    let p_frame = session.pools.next_ready().expect("就绪 P");
    assert_eq!(p_frame.display_index, 2);
    session.encode_frame(collab, p_frame).expect("编码 P");

    let b_frame = session.pools.next_ready().expect("就绪 B");
    assert_eq!(b_frame.frame_type, FrameType::B);
    let lists = session.pools.build_ref_lists(&b_frame, false);
    let ids = |l: usize| lists.lists[l].iter().map(|e| e.id).collect::<Vec<_>>();
    assert_eq!(ids(0), vec![0, 2], "list0: 前向 I 在先");
    assert_eq!(ids(1), vec![2, 0], "list1: 后向 P 在先");

    let col = session.pools.reference(2).expect("col 图像为 P");
    let tables = BiPredTables::new(b_frame.poc, &lists, false);
    let direct = TemporalDirect::new(col, &lists.lists[0], &tables);
    let mut moving = 0;
    for (mb_xy, rec) in col.records.iter().enumerate() {
        if !matches!(rec.mb_type, MbType::P16x16 | MbType::PSkip) || rec.ref_idx[0][0] != 0 {
            continue;
        }
        let m = direct.derive(mb_xy);
        let mv_col = rec.mv[0][0];
        // POC 0, 2, 4: DistScaleFactor = 128
        let scaled: [i16; 2] = std::array::from_fn(|c| ((128 * i32::from(mv_col[c]) + 128) >> 8) as i16);
        assert_eq!(m.ref_idx[0][0], 0);
        assert_eq!(m.mv[0][0], scaled, "宏块 {mb_xy} 的 mvL0");
        assert_eq!(
            m.mv[1][0],
            [scaled[0] - mv_col[0], scaled[1] - mv_col[1]],
            "宏块 {mb_xy} 的 mvL1"
        );
        if mv_col != [0, 0] {
            moving += 1;
        }
    }
    assert!(moving > 0, "平移内容的 P 帧应含非零运动矢量");

    session.encode_frame(collab, b_frame).expect("编码 B");
    assert_eq!(session.packets.len(), 3);
    assert!(
        session.pools.references().iter().all(|f| f.frame_type != FrameType::B),
        "B 帧不进入参考池"
    );
}

#[test]
fn test_reference_pool_bounded_over_long_sequence() {
    let config = H264EncoderConfig {
        bframes: 2,
        lookahead: 3,
        ref_frames: 2,
        long_term_interval: 3,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let max_refs = enc.parameter_sets().expect("参数集").0.num_ref_frames as usize;
    let mut packets = Vec::new();
    for i in 0..20 {
        enc.send_frame(Some(&textured_frame(32, 32, i, i as f64)))
            .expect("送入帧");
        drain(&mut enc, &mut packets);
        let session = enc.session.as_ref().expect("会话");
        assert!(session.pools.reference_len() <= max_refs, "第 {i} 帧后参考池超出上限");
    }
    enc.send_frame(None).expect("结束");
    drain(&mut enc, &mut packets);
    assert_eq!(packets.len(), 20);
    let session = enc.session.as_ref().expect("会话");
    assert!(
        session.pools.references().iter().any(|f| f.is_long_term()),
        "应存在长期参考帧"
    );
}

#[test]
fn test_forced_picture_types() {
    let mut enc = open_encoder(base_config(), 32, 32);
    let frames: Vec<_> = (0..4)
        .map(|i| {
            let mut f = flat_frame(32, 32, i, 80);
            if i == 2 {
                f.picture_type = PictureType::I;
            }
            f
        })
        .collect();
    let packets = encode_all(&mut enc, &frames);
    let keyframes: Vec<bool> = packets.iter().map(|p| p.is_keyframe).collect();
    assert_eq!(keyframes, vec![true, false, true, false]);
}

#[test]
fn test_scenecut_starts_new_idr() {
    let config = H264EncoderConfig {
        b_adapt: BAdapt::Adaptive,
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 64);
    let mut frames: Vec<_> = (0..3).map(|i| textured_frame(64, 64, i, i as f64)).collect();
    // 完全不同的内容
    frames.extend((3..5).map(|i| {
        yuv_frame(64, 64, i, |p, x, y| {
            if p == 0 {
                if (x / 4 + y / 4) % 2 == 0 { 16 } else { 235 }
            } else {
                128
            }
        })
    }));
    let packets = encode_all(&mut enc, &frames);
    let keyframes: Vec<bool> = packets.iter().map(|p| p.is_keyframe).collect();
    assert_eq!(keyframes, vec![true, false, false, true, false]);
}

#[test]
fn test_flush_restarts_with_idr() {
    let mut enc = open_encoder(base_config(), 32, 32);
    let first = encode_all(&mut enc, &[flat_frame(32, 32, 0, 50), flat_frame(32, 32, 1, 50)]);
    assert_eq!(first.len(), 2);
    assert!(matches!(enc.receive_packet(), Err(tao264_core::TaoError::Eof)));

    enc.flush();
    assert!(matches!(
        enc.receive_packet(),
        Err(tao264_core::TaoError::NeedMoreData)
    ));
    let second = encode_all(&mut enc, &[flat_frame(32, 32, 10, 70)]);
    assert_eq!(second.len(), 1);
    assert!(second[0].is_keyframe);
    assert_eq!(second[0].pts, 10);
    let session = enc.session.as_ref().expect("会话");
    assert_eq!(session.pools.reference_len(), 1);
}

#[test]
fn test_unused_refs_are_marked_unavailable() {
    // P 帧只引用一个参考时, 8x8 块的 list1 参考保持未使用
    let mut enc = open_encoder(base_config(), 32, 32);
    let frames: Vec<_> = (0..2).map(|i| textured_frame(32, 32, i, i as f64 * 2.0)).collect();
    encode_all(&mut enc, &frames);
    let session = enc.session.as_ref().expect("会话");
    let p = session
        .pools
        .references()
        .iter()
        .find(|f| f.frame_type == FrameType::P)
        .expect("P 帧在参考池中");
    assert!(p.records.iter().all(|r| r.ref_idx[1] == [REF_NOT_USED; 4]));
}

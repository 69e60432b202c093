use crate::encoder::Encoder;

use tao264_core::bitreader::BitReader;

use super::super::H264EncoderConfig;
use super::super::cabac::{CabacDecoder, ContextBank};
use super::super::nal::{NalUnitType, remove_emulation_prevention};
use super::super::slice_header::{SliceType, parse_slice_header};
use super::helpers::*;

#[test]
fn test_idr_access_unit_starts_with_parameter_sets() {
    let mut enc = open_encoder(base_config(), 32, 32);
    let packets = encode_all(&mut enc, &[flat_frame(32, 32, 0, 90)]);
    assert_eq!(packets.len(), 1);
    assert!(packets[0].is_keyframe);
    assert!(packets[0].data.starts_with(&[0, 0, 0, 1]), "访问单元首个 NAL 使用 4 字节起始码");

    let nals = split_annex_b(&packets[0].data);
    let types: Vec<u8> = nals.iter().map(|n| nal_type(n)).collect();
    assert_eq!(
        types,
        vec![
            NalUnitType::Sps.type_id(),
            NalUnitType::Pps.type_id(),
            NalUnitType::SliceIdr.type_id()
        ]
    );
    assert_eq!(nal_ref_idc(nals[2]), 3);

    let extra = enc.extra_data().expect("打开后应有 extra_data");
    let extra_nals = split_annex_b(extra);
    assert_eq!(extra_nals, nals[..2].to_vec(), "extra_data 与码流中的参数集一致");
}

#[test]
fn test_length_prefixed_output_and_avcc_extra_data() {
    let config = H264EncoderConfig {
        annexb: false,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let packets = encode_all(&mut enc, &[flat_frame(32, 32, 0, 90), flat_frame(32, 32, 1, 90)]);
    let extra = enc.extra_data().expect("avcC");
    assert_eq!(extra[0], 1, "configurationVersion");
    assert_eq!(extra[4], 0xFF, "lengthSizeMinusOne = 3");

    let first: Vec<u8> = split_length_prefixed(&packets[0].data).iter().map(|n| nal_type(n)).collect();
    assert_eq!(first, vec![7, 8, 5]);
    let second: Vec<u8> = split_length_prefixed(&packets[1].data).iter().map(|n| nal_type(n)).collect();
    assert_eq!(second, vec![1], "非 IDR 访问单元不重复参数集");
}

#[test]
fn test_repeat_headers_on_every_access_unit() {
    let config = H264EncoderConfig {
        repeat_headers: true,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let frames: Vec<_> = (0..3).map(|i| flat_frame(32, 32, i, 100)).collect();
    let packets = encode_all(&mut enc, &frames);
    assert_eq!(packets.len(), 3);
    for pkt in &packets {
        let types: Vec<u8> = split_annex_b(&pkt.data).iter().map(|n| nal_type(n)).collect();
        assert_eq!(&types[..2], &[7, 8]);
    }
}

#[test]
fn test_slices_cover_macroblock_rows_in_order() {
    let config = H264EncoderConfig {
        slice_count: 3,
        threads: 2,
        ..base_config()
    };
    let mut enc = open_encoder(config, 64, 48);
    let log2_max_frame_num = enc.parameter_sets().expect("参数集").0.log2_max_frame_num;
    let frames: Vec<_> = (0..2).map(|i| textured_frame(64, 48, i, i as f64 * 2.0)).collect();
    let packets = encode_all(&mut enc, &frames);
    assert_eq!(packets.len(), 2);

    for (k, pkt) in packets.iter().enumerate() {
        let slices: Vec<SlicePrefix> = split_annex_b(&pkt.data)
            .into_iter()
            .filter(|n| matches!(nal_type(n), 1 | 5))
            .map(|n| parse_slice_prefix(n, log2_max_frame_num))
            .collect();
        let first_mbs: Vec<u32> = slices.iter().map(|s| s.first_mb).collect();
        assert_eq!(first_mbs, vec![0, 4, 8], "第 {k} 帧每个 slice 一行宏块");
        assert!(slices.iter().all(|s| s.frame_num == k as u32));
    }
}

#[test]
fn test_idr_pic_id_alternates() {
    let config = H264EncoderConfig {
        keyint_max: 2,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let log2_max_frame_num = enc.parameter_sets().expect("参数集").0.log2_max_frame_num;
    let frames: Vec<_> = (0..5).map(|i| flat_frame(32, 32, i, 60 + i as u8 * 10)).collect();
    let packets = encode_all(&mut enc, &frames);
    let idr_ids: Vec<Option<u32>> = packets
        .iter()
        .filter(|p| p.is_keyframe)
        .map(|p| {
            let nals = split_annex_b(&p.data);
            let slice = nals.iter().find(|n| nal_type(n) == 5).expect("IDR slice");
            parse_slice_prefix(slice, log2_max_frame_num).idr_pic_id
        })
        .collect();
    assert_eq!(idr_ids, vec![Some(0), Some(1), Some(0)]);
}

#[test]
fn test_b_frames_are_non_reference() {
    let config = H264EncoderConfig {
        bframes: 1,
        lookahead: 2,
        ..base_config()
    };
    let mut enc = open_encoder(config, 32, 32);
    let log2_max_frame_num = enc.parameter_sets().expect("参数集").0.log2_max_frame_num;
    let frames: Vec<_> = (0..3).map(|i| textured_frame(32, 32, i, i as f64)).collect();
    let packets = encode_all(&mut enc, &frames);
    assert_eq!(packets.len(), 3);

    let b = split_annex_b(&packets[2].data)[0];
    assert_eq!(nal_type(b), 1);
    assert_eq!(nal_ref_idc(b), 0, "B 帧不作参考");
    let prefix = parse_slice_prefix(b, log2_max_frame_num);
    assert_eq!(prefix.slice_type, 1);
    // B 帧沿用其后向锚点 P 之后的 frame_num
    assert_eq!(prefix.frame_num, 2);

    let p = split_annex_b(&packets[1].data)[0];
    assert_eq!(nal_ref_idc(p), 2);
    assert_eq!(parse_slice_prefix(p, log2_max_frame_num).frame_num, 1);
}

#[test]
fn test_first_macroblock_decodes_as_i16x16_dc() {
    let mut enc = open_encoder(base_config(), 32, 32);
    let packets = encode_all(&mut enc, &[flat_frame(32, 32, 0, 128)]);
    let session = enc.session.as_ref().expect("编码会话");
    let nals = split_annex_b(&packets[0].data);
    let idr = nals
        .iter()
        .find(|n| nal_type(n) == NalUnitType::SliceIdr.type_id())
        .expect("IDR slice");

    let rbsp = remove_emulation_prevention(&idr[1..]);
    let mut br = BitReader::new(&rbsp);
    let header = parse_slice_header(&mut br, &session.sps, &session.pps, true, nal_ref_idc(idr))
        .expect("解析 slice 头部");
    assert_eq!(header.slice_type, SliceType::I);
    assert_eq!(header.first_mb, 0);
    // cabac_alignment_one_bit
    while br.bits_left() % 8 != 0 {
        assert_eq!(br.read_bit().expect("对齐位"), 1, "CABAC 对齐位必须为 1");
    }
    let start = rbsp.len() - br.bits_left() / 8;

    let bank = ContextBank::new(true, 0, header.slice_qp(&session.pps));
    let mut dec = CabacDecoder::new(&rbsp[start..], bank);
    // 首个宏块无邻居, mb_type 首 bin 的 ctxInc 为 0
    assert_eq!(dec.decode_decision(3), 1, "不应为 I_NxN");
    assert_eq!(dec.decode_terminate(), 0, "不应为 I_PCM");
    let luma_ac = dec.decode_decision(3 + 3);
    let chroma_nonzero = dec.decode_decision(3 + 4);
    let pred_mode = (dec.decode_decision(3 + 6) << 1) | dec.decode_decision(3 + 7);
    assert_eq!(luma_ac, 0, "平坦块无亮度 AC");
    assert_eq!(chroma_nonzero, 0, "平坦块色度 CBP 为 0");
    assert_eq!(pred_mode, 2, "左上角宏块只能用 DC 预测");
    assert_eq!(1 + pred_mode + 4 * chroma_nonzero + 12 * luma_ac, 3, "mb_type 应为 I_16x16_2_0_0");
    assert_eq!(dec.decode_decision(64), 0, "色度预测模式为 DC");
}

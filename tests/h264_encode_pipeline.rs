//! 通过公共 API 驱动 H.264 编码器的端到端测试.

use tao264::codec::{CodecId, CodecParameters, Encoder, Packet, VideoCodecParams, VideoFrame};
use tao264::core::{PixelFormat, Rational, TaoError};

fn params(width: u32, height: u32) -> CodecParameters {
    CodecParameters::new_video(
        CodecId::H264,
        VideoCodecParams {
            width,
            height,
            pixel_format: PixelFormat::Yuv420p,
            frame_rate: Rational::new(30, 1),
            sample_aspect_ratio: Rational::new(1, 1),
        },
    )
}

fn gradient_frame(width: u32, height: u32, pts: i64) -> VideoFrame {
    let mut frame = VideoFrame::alloc(width, height, PixelFormat::Yuv420p);
    for plane in 0..3 {
        let stride = frame.linesize[plane];
        for (i, v) in frame.data[plane].iter_mut().enumerate() {
            let (x, y) = (i % stride, i / stride);
            *v = if plane == 0 {
                ((x * 3 + y * 2 + pts as usize * 2) & 0xFF) as u8
            } else {
                128
            };
        }
    }
    frame.pts = pts;
    frame.duration = 1;
    frame.time_base = Rational::new(1, 30);
    frame
}

fn collect(encoder: &mut dyn Encoder, out: &mut Vec<Packet>) -> bool {
    loop {
        match encoder.receive_packet() {
            Ok(pkt) => out.push(pkt),
            Err(TaoError::NeedMoreData) => return false,
            Err(TaoError::Eof) => return true,
            Err(e) => panic!("取包失败: {e}"),
        }
    }
}

#[test]
fn test_registry_creates_h264_encoder() {
    let registry = tao264::default_codec_registry();
    let encoders = registry.list_encoders();
    assert!(encoders.iter().any(|(id, name)| *id == CodecId::H264 && *name == "libtao264"));
    let by_name = registry.create_encoder_by_name("libtao264").expect("按名称创建");
    assert_eq!(by_name.codec_id(), CodecId::H264);
    assert!(!tao264::version().is_empty());
}

#[test]
fn test_encode_pipeline_produces_annex_b_stream() {
    let registry = tao264::default_codec_registry();
    let mut encoder = registry.create_encoder(CodecId::H264).expect("创建编码器");
    encoder.open(&params(96, 64)).expect("打开编码器");
    let extra = encoder.extra_data().expect("SPS/PPS").to_vec();
    assert!(extra.starts_with(&[0, 0, 0, 1, 0x67]), "extra_data 以 SPS 开头");

    let mut packets = Vec::new();
    for pts in 0..12 {
        encoder
            .send_frame(Some(&gradient_frame(96, 64, pts)))
            .expect("送入帧");
        assert!(!collect(encoder.as_mut(), &mut packets));
    }
    encoder.send_frame(None).expect("结束信号");
    assert!(collect(encoder.as_mut(), &mut packets));

    assert_eq!(packets.len(), 12, "每个输入帧对应一个数据包");
    assert!(packets[0].is_keyframe);
    assert!(packets[0].data.starts_with(&extra), "首个访问单元携带参数集");
    assert!(packets.iter().all(|p| p.data.starts_with(&[0, 0, 0, 1])));

    let mut pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    pts.sort_unstable();
    assert_eq!(pts, (0..12).collect::<Vec<_>>(), "显示时间戳完整无重复");
    assert!(packets.windows(2).all(|w| w[0].dts < w[1].dts));
    assert!(packets.iter().all(|p| p.duration == 1));

    // 结束后继续取包仍为 Eof
    assert!(matches!(encoder.receive_packet(), Err(TaoError::Eof)));
}

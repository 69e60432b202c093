//! H.264/AVC 视频编码器.
//!
//! 输入帧经色彩空间转换进入待决策池, 前瞻窗口填满后由帧类型决策策略分组
//! (锚点先于其 B 帧编码), 再按编码顺序逐帧编码. 每帧按宏块行均分为若干 slice,
//! 每个 slice 拥有独立的宏块上下文、CABAC 状态与重建条带, 在 rayon 线程池中
//! 并行编码, 结果按 slice 顺序拼接为一个访问单元.

pub mod analyse;
pub mod cabac;
mod cabac_tables;
pub mod config;
pub mod csp;
pub mod deblock;
pub mod direct;
pub mod frames;
pub mod lookahead;
pub mod macroblock;
pub mod mc;
pub mod nal;
pub mod parameter_sets;
pub mod predict;
pub mod ratecontrol;
pub mod slice_encoder;
pub mod slice_header;
pub mod stats;
pub mod syntax;
pub mod tables;
pub mod transform;

use std::collections::VecDeque;

use bytes::Bytes;
use log::{debug, info, warn};
use rayon::ThreadPool;
use rayon::prelude::*;
use tao264_core::timestamp::{DtsGenerator, NOPTS_VALUE};
use tao264_core::{Rational, TaoError, TaoResult};

use crate::codec_id::CodecId;
use crate::codec_parameters::CodecParameters;
use crate::encoder::Encoder;
use crate::frame::VideoFrame;
use crate::packet::Packet;

use analyse::{CostFunction, DiamondSearch, MotionSearch, Satd};
use csp::{Bt601Converter, ColorspaceConverter};
use deblock::{LoopFilter, NoLoopFilter};
use direct::BiPredTables;
use frames::{Frame, FramePools, FrameType, PlaneBand, Plane, YuvPlanes};
use lookahead::{AdaptiveB, FixedGop, FrameTypeDecider, LookaheadEntry, downscale_luma, estimate_costs};
use nal::{NalPriority, NalUnit, NalUnitType, build_avcc_config, serialize_access_unit};
use parameter_sets::{Pps, Sps};
use ratecontrol::{RateControl, RcFrameInfo, adaptive_qp_plan, create_rate_control};
use slice_encoder::{FrameContext, SliceJob, SliceOutput, encode_slice};
use slice_header::{RefPicMarking, SliceHeader};
use stats::{EncoderStats, FrameStats, SliceStats, planes_psnr};

pub use config::{BAdapt, H264EncoderConfig};

/// 可替换的外部协作者
struct Collaborators {
    converter: Box<dyn ColorspaceConverter>,
    cost: Box<dyn CostFunction>,
    /// `None` 时使用按配置构造的菱形搜索
    search: Option<Box<dyn MotionSearch>>,
    loop_filter: Box<dyn LoopFilter>,
    /// `None` 时按 `b_adapt` 选择
    decider: Option<Box<dyn FrameTypeDecider>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            converter: Box::new(Bt601Converter),
            cost: Box::new(Satd),
            search: None,
            loop_filter: Box::new(NoLoopFilter),
            decider: None,
        }
    }
}

/// 打开后的编码会话状态
struct Session {
    config: H264EncoderConfig,
    /// 输入尺寸
    width: u32,
    height: u32,
    sps: Sps,
    pps: Pps,
    sps_nal: NalUnit,
    pps_nal: NalUnit,
    extra_data: Vec<u8>,
    pools: FramePools,
    decider: Box<dyn FrameTypeDecider>,
    rc: Box<dyn RateControl>,
    default_search: DiamondSearch,
    thread_pool: Option<ThreadPool>,
    /// 会话时间基与默认帧间隔
    time_base: Rational,
    frame_interval: Rational,
    dts: Option<DtsGenerator>,
    next_pts: i64,
    next_display: u64,
    prev_lowres: Option<Plane>,
    /// 自上一个 IDR 起的 P 帧计数 (长期参考标记用)
    p_since_idr: u32,
    packets: VecDeque<Packet>,
    stats: EncoderStats,
    last_frame: Option<FrameStats>,
    flushing: bool,
}

/// H.264 编码器
pub struct H264Encoder {
    config: H264EncoderConfig,
    collab: Collaborators,
    session: Option<Session>,
}

impl H264Encoder {
    /// 使用默认配置创建 (注册表入口)
    pub fn create() -> TaoResult<Box<dyn Encoder>> {
        Ok(Box::new(Self::with_config(H264EncoderConfig::default())))
    }

    pub fn with_config(config: H264EncoderConfig) -> Self {
        Self {
            config,
            collab: Collaborators::default(),
            session: None,
        }
    }

    /// 当前配置; 打开后为修正过的生效配置
    pub fn config(&self) -> &H264EncoderConfig {
        self.session.as_ref().map_or(&self.config, |s| &s.config)
    }

    /// 替换配置, 在下一次 `open()` 时生效
    pub fn set_config(&mut self, config: H264EncoderConfig) {
        self.config = config;
    }

    pub fn set_colorspace_converter(&mut self, converter: Box<dyn ColorspaceConverter>) {
        self.collab.converter = converter;
    }

    pub fn set_cost_function(&mut self, cost: Box<dyn CostFunction>) {
        self.collab.cost = cost;
    }

    pub fn set_motion_search(&mut self, search: Box<dyn MotionSearch>) {
        self.collab.search = Some(search);
    }

    pub fn set_loop_filter(&mut self, filter: Box<dyn LoopFilter>) {
        self.collab.loop_filter = filter;
    }

    /// 替换帧类型决策策略, 在下一次 `open()` 时生效
    pub fn set_frame_type_decider(&mut self, decider: Box<dyn FrameTypeDecider>) {
        self.collab.decider = Some(decider);
    }

    /// 会话累计统计
    pub fn stats(&self) -> Option<&EncoderStats> {
        self.session.as_ref().map(|s| &s.stats)
    }

    /// 最近编码完成的一帧的统计
    pub fn last_frame_stats(&self) -> Option<&FrameStats> {
        self.session.as_ref().and_then(|s| s.last_frame.as_ref())
    }

    /// 打开后的 SPS / PPS
    pub fn parameter_sets(&self) -> Option<(&Sps, &Pps)> {
        self.session.as_ref().map(|s| (&s.sps, &s.pps))
    }
}

impl Encoder for H264Encoder {
    fn codec_id(&self) -> CodecId {
        CodecId::H264
    }

    fn name(&self) -> &str {
        "libtao264"
    }

    fn open(&mut self, params: &CodecParameters) -> TaoResult<()> {
        let video = params
            .video()
            .ok_or_else(|| TaoError::InvalidArgument("H264Enc: 需要视频参数".into()))?;
        if video.width == 0 || video.height == 0 {
            return Err(TaoError::InvalidArgument("H264Enc: 宽度和高度不能为 0".into()));
        }
        if video.width % 2 != 0 || video.height % 2 != 0 {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: 4:2:0 要求偶数尺寸, 实际 {}x{}",
                video.width, video.height
            )));
        }
        if !csp::is_input_supported(video.pixel_format) {
            return Err(TaoError::Unsupported(format!(
                "H264Enc: 不支持的输入像素格式 {}",
                video.pixel_format
            )));
        }

        let mut config = self.config.clone();
        config.apply_env_overrides();
        if params.bit_rate > 0 && config.bitrate.is_none() {
            config.bitrate = Some(u32::try_from(params.bit_rate).unwrap_or(u32::MAX));
        }
        config.validate()?;
        config.resolve();

        let frame_rate = video.frame_rate.is_positive().then_some(video.frame_rate);
        let sps = Sps::new(&config, video.width, video.height, frame_rate);
        let pps = Pps::new(&config);
        let sps_nal = sps.to_nal();
        let pps_nal = pps.to_nal();
        let extra_data = if config.annexb {
            serialize_access_unit(&[sps_nal.clone(), pps_nal.clone()], true)
        } else {
            build_avcc_config(&sps_nal, &pps_nal)?
        };

        let decider: Box<dyn FrameTypeDecider> = match self.collab.decider.take() {
            Some(decider) => decider,
            None => match config.b_adapt {
                BAdapt::Fixed => Box::new(FixedGop::new(config.keyint_max, config.bframes)),
                BAdapt::Adaptive => Box::new(AdaptiveB::new(
                    config.keyint_max,
                    config.bframes,
                    config.scenecut_threshold,
                )),
            },
        };
        let fps = frame_rate.map_or(25.0, |r| r.to_f64());
        let rc = create_rate_control(&config, fps);
        let thread_pool = if config.threads > 0 && config.slice_count > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .thread_name(|idx| format!("h264enc-slice-{idx}"))
                .build()
                .map_err(|e| TaoError::ResourceExhausted(format!("H264Enc: 无法创建 slice 线程池: {e}")))?;
            Some(pool)
        } else {
            None
        };
        let frame_interval = frame_rate.map_or(Rational::new(1, 25), |r| r.invert());

        info!(
            "H264Enc: 打开编码器 {}x{} (宏块 {}x{}), profile={}, level={}, qp={}, 码率={:?}, B 帧={}, 参考帧={}, slice={}",
            video.width,
            video.height,
            sps.mb_width,
            sps.mb_height,
            sps.profile_idc,
            sps.level_idc,
            config.qp,
            config.bitrate,
            config.bframes,
            config.ref_frames,
            config.slice_count,
        );

        self.session = Some(Session {
            pools: FramePools::new(sps.num_ref_frames as usize, config.ref_frames as usize, sps.max_frame_num()),
            default_search: DiamondSearch {
                subpel_refine: config.subpel_refine,
            },
            width: video.width,
            height: video.height,
            sps,
            pps,
            sps_nal,
            pps_nal,
            extra_data,
            decider,
            rc,
            thread_pool,
            time_base: frame_interval,
            frame_interval,
            dts: None,
            next_pts: 0,
            next_display: 0,
            prev_lowres: None,
            p_since_idr: 0,
            packets: VecDeque::new(),
            stats: EncoderStats::default(),
            last_frame: None,
            flushing: false,
            config,
        });
        Ok(())
    }

    fn extra_data(&self) -> Option<&[u8]> {
        self.session.as_ref().map(|s| s.extra_data.as_slice())
    }

    fn send_frame(&mut self, frame: Option<&VideoFrame>) -> TaoResult<()> {
        let Some(session) = self.session.as_mut() else {
            return Err(TaoError::Codec("H264Enc: 编码器未打开, 请先调用 open()".into()));
        };
        match frame {
            Some(frame) => {
                if session.flushing {
                    return Err(TaoError::Codec("H264Enc: 已收到结束信号, 请先调用 flush()".into()));
                }
                session.intake(&self.collab, frame)?;
                session.drain(&self.collab, false)
            }
            None => {
                session.flushing = true;
                session.drain(&self.collab, true)
            }
        }
    }

    fn receive_packet(&mut self) -> TaoResult<Packet> {
        let Some(session) = self.session.as_mut() else {
            return Err(TaoError::Codec("H264Enc: 编码器未打开, 请先调用 open()".into()));
        };
        if let Some(pkt) = session.packets.pop_front() {
            return Ok(pkt);
        }
        if session.flushing {
            return Err(TaoError::Eof);
        }
        Err(TaoError::NeedMoreData)
    }

    fn flush(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.reset();
        }
    }
}

impl Session {
    /// 转换输入帧并放入待决策池
    fn intake(&mut self, collab: &Collaborators, frame: &VideoFrame) -> TaoResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(TaoError::InvalidArgument(format!(
                "H264Enc: 输入帧尺寸 {}x{} 与编码尺寸 {}x{} 不一致",
                frame.width, frame.height, self.width, self.height
            )));
        }
        let (w, h) = (self.sps.mb_width as usize * 16, self.sps.mb_height as usize * 16);
        let mut source = self.pools.take_storage(w, h);
        collab.converter.convert(frame, &mut source)?;
        let lowres = downscale_luma(source.luma());
        let costs = estimate_costs(&lowres, self.prev_lowres.as_ref());
        let recon = self.pools.take_storage(w, h);

        if frame.time_base.is_positive() {
            self.time_base = frame.time_base;
        }
        let duration = if frame.duration > 0 {
            frame.duration
        } else {
            self.frame_interval.rescale(1, self.time_base).unwrap_or(1).max(1)
        };
        let pts = if frame.pts == NOPTS_VALUE { self.next_pts } else { frame.pts };
        self.next_pts = pts + duration;
        self.dts
            .get_or_insert_with(|| DtsGenerator::new(usize::from(self.config.bframes > 0), duration))
            .push_input(pts);

        let mut f = Frame::new(self.next_display, pts, duration, frame.picture_type, source, recon, lowres.clone());
        f.costs = costs;
        self.next_display += 1;
        self.prev_lowres = Some(lowres);
        self.pools.intake(f);
        Ok(())
    }

    /// 窗口足够时决定帧类型并编码所有就绪帧
    fn drain(&mut self, collab: &Collaborators, flushing: bool) -> TaoResult<()> {
        let window_len = self.config.lookahead as usize;
        while self.pools.pending_len() > 0 && (flushing || self.pools.pending_len() >= window_len) {
            let window: Vec<LookaheadEntry> = self
                .pools
                .pending()
                .map(|f| LookaheadEntry {
                    forced: f.forced,
                    costs: f.costs,
                })
                .collect();
            let types = self.decider.decide(&window, flushing);
            if types.is_empty() {
                break;
            }
            self.pools.promote(&types)?;
            while let Some(frame) = self.pools.next_ready() {
                self.encode_frame(collab, frame)?;
            }
        }
        Ok(())
    }

    fn encode_frame(&mut self, collab: &Collaborators, mut frame: Frame) -> TaoResult<()> {
        let frame_type = frame.frame_type;
        let lists = self.pools.build_ref_lists(&frame, false);
        frame.set_ref_lists(&lists);

        let mark_long = match frame_type {
            FrameType::Idr => {
                self.p_since_idr = 0;
                false
            }
            FrameType::P => {
                self.p_since_idr += 1;
                let interval = self.config.long_term_interval;
                interval > 0 && self.p_since_idr % interval == 0
            }
            FrameType::B => false,
        };
        let marking = match self.pools.plan_marking(&frame, mark_long) {
            Ok(marking) => marking,
            Err(e) => {
                self.pools.discard(frame);
                return Err(e);
            }
        };

        let complexity = match frame_type {
            FrameType::Idr => frame.costs.intra,
            _ => frame.costs.inter,
        };
        let qp = self.rc.next_qp(&RcFrameInfo { frame_type, complexity });
        frame.qp = qp;

        let (slice_nals, mb_stats) = match self.encode_slices(collab, &mut frame, &lists, &marking) {
            Ok(out) => out,
            Err(e) => {
                warn!("H264Enc: 帧 #{} 编码失败, 丢弃: {}", frame.display_index, e);
                self.pools.discard(frame);
                return Err(e);
            }
        };

        let mut au = Vec::with_capacity(slice_nals.len() + 2);
        if frame_type == FrameType::Idr || self.config.repeat_headers {
            au.push(self.sps_nal.clone());
            au.push(self.pps_nal.clone());
        }
        au.extend(slice_nals);
        let data = serialize_access_unit(&au, self.config.annexb);

        let psnr = self
            .config
            .compute_psnr
            .then(|| {
                planes_psnr(
                    &frame.source.planes,
                    &frame.recon.planes,
                    self.width as usize,
                    self.height as usize,
                )
            });
        let frame_stats = FrameStats {
            frame_type: Some(frame_type),
            qp,
            bits: data.len() as u64 * 8,
            mb: mb_stats,
            psnr,
        };
        self.rc.report_frame_stats(
            frame_type,
            frame_stats.bits,
            &frame_stats.mb.mb_types,
            frame_stats.average_distortion(),
        );
        self.stats.record(&frame_stats);
        debug!(
            "H264Enc: 帧 #{} {:?} poc={} frame_num={} qp={} 大小={} 字节{}",
            frame.display_index,
            frame_type,
            frame.poc,
            frame.frame_num,
            qp,
            data.len(),
            psnr.map_or(String::new(), |p| format!(" PSNR Y:{:.2}", p[0]))
        );
        self.last_frame = Some(frame_stats);

        let (pts, duration) = (frame.pts, frame.duration);
        self.pools.commit(frame, &marking)?;

        let mut pkt = Packet::from_data(Bytes::from(data));
        pkt.pts = pts;
        pkt.dts = self.dts.as_mut().map_or(pts, |g| g.next_dts());
        pkt.duration = duration;
        pkt.time_base = self.time_base;
        pkt.is_keyframe = frame_type == FrameType::Idr;
        self.packets.push_back(pkt);
        Ok(())
    }

    /// 编码一帧的全部 slice, 重建写入 `frame.recon` 并完成滤波与边缘扩展
    fn encode_slices(
        &self,
        collab: &Collaborators,
        frame: &mut Frame,
        lists: &frames::RefLists,
        marking: &RefPicMarking,
    ) -> TaoResult<(Vec<NalUnit>, SliceStats)> {
        let mb_width = self.sps.mb_width as usize;
        let mb_height = self.sps.mb_height as usize;
        let frame_type = frame.frame_type;
        let qp_plan = if self.config.variable_qp {
            adaptive_qp_plan(
                frame.source.luma(),
                mb_width,
                mb_height,
                frame.qp,
                (self.config.qp_min, self.config.qp_max),
            )
        } else {
            vec![frame.qp; mb_width * mb_height]
        };

        let rows = slice_rows(mb_height, self.config.slice_count as usize);
        let deblock = collab.loop_filter.params();
        let jobs: Vec<SliceJob> = rows
            .iter()
            .map(|&(r0, r1)| SliceJob {
                header: SliceHeader {
                    first_mb: (r0 * mb_width) as u32,
                    slice_type: frame_type.slice_type(),
                    pps_id: self.pps.pps_id,
                    frame_num: frame.frame_num,
                    idr_pic_id: (frame_type == FrameType::Idr).then_some(frame.idr_pic_id),
                    poc_lsb: frame.poc as u32 % self.sps.max_poc_lsb(),
                    direct_spatial_mv_pred: false,
                    num_ref_idx_active: lists.num_active(),
                    reorder: lists.reorder.clone(),
                    marking: marking.clone(),
                    cabac_init_idc: self.config.cabac_init_idc,
                    qp_delta: i32::from(frame.qp) - 26 - self.pps.pic_init_qp_minus26,
                    disable_deblocking_filter_idc: deblock.disable_idc,
                    slice_alpha_c0_offset_div2: deblock.alpha_c0_offset_div2,
                    slice_beta_offset_div2: deblock.beta_offset_div2,
                },
                end_mb: r1 * mb_width,
            })
            .collect();

        let mut refs: [Vec<&YuvPlanes>; 2] = [Vec::new(), Vec::new()];
        for (list, entries) in lists.lists.iter().enumerate() {
            for e in entries {
                let r = self.pools.reference(e.id).ok_or_else(|| {
                    TaoError::Internal(format!("H264Enc: 参考帧 #{} 不在参考池中", e.id))
                })?;
                refs[list].push(&r.recon);
            }
        }
        let (col, bipred) = if frame_type == FrameType::B {
            let col = lists.lists[1].first().and_then(|e| self.pools.reference(e.id));
            let tables = BiPredTables::new(frame.poc, lists, self.pps.weighted_bipred_idc == 2);
            (col, Some(tables))
        } else {
            (None, None)
        };
        let (nal_type, priority) = match frame_type {
            FrameType::Idr => (NalUnitType::SliceIdr, NalPriority::Highest),
            FrameType::P => (NalUnitType::Slice, NalPriority::High),
            FrameType::B => (NalUnitType::Slice, NalPriority::Disposable),
        };
        let search: &dyn MotionSearch = match &collab.search {
            Some(search) => search.as_ref(),
            None => &self.default_search,
        };

        let outputs = {
            let ctx = FrameContext {
                sps: &self.sps,
                pps: &self.pps,
                nal_type,
                priority,
                source: &frame.source,
                refs,
                lists,
                col,
                bipred: bipred.as_ref(),
                qp_plan: &qp_plan,
                cost: collab.cost.as_ref(),
                search,
                me_range: self.config.me_range,
                lossless: self.config.lossless,
            };
            let bands = frame.recon.split_bands(&rows);
            run_slices(self.thread_pool.as_ref(), &ctx, jobs, bands)?
        };

        let mut records = Vec::with_capacity(mb_width * mb_height);
        let mut nals = Vec::with_capacity(outputs.len());
        let mut mb_stats = SliceStats::default();
        for out in outputs {
            records.extend(out.records);
            mb_stats.merge(&out.stats);
            nals.push(out.nal);
        }
        collab.loop_filter.filter_frame(&records, mb_width, &mut frame.recon);
        frame.recon.extend_edges();
        frame.records = records;
        Ok((nals, mb_stats))
    }

    /// 清空全部缓冲, 下一帧从 IDR 开始
    fn reset(&mut self) {
        if self.stats.frames() > 0 {
            self.stats.log_summary();
        }
        self.pools.clear();
        self.decider.reset();
        self.packets.clear();
        self.dts = None;
        self.prev_lowres = None;
        self.p_since_idr = 0;
        self.stats = EncoderStats::default();
        self.last_frame = None;
        self.flushing = false;
    }
}

/// 把 `mb_height` 行宏块均分给 `slices` 个 slice, 返回各自的 [起始行, 结束行)
fn slice_rows(mb_height: usize, slices: usize) -> Vec<(usize, usize)> {
    let n = slices.clamp(1, mb_height.max(1));
    (0..n).map(|i| (i * mb_height / n, (i + 1) * mb_height / n)).collect()
}

/// 执行 slice 任务, 多个 slice 时并行, 结果保持 slice 顺序
fn run_slices(
    pool: Option<&ThreadPool>,
    ctx: &FrameContext<'_>,
    jobs: Vec<SliceJob>,
    bands: Vec<[PlaneBand<'_>; 3]>,
) -> TaoResult<Vec<SliceOutput>> {
    if jobs.len() == 1 {
        return jobs
            .into_iter()
            .zip(bands)
            .map(|(job, band)| encode_slice(ctx, job, band))
            .collect();
    }
    let run = || {
        jobs.into_par_iter()
            .zip(bands.into_par_iter())
            .map(|(job, band)| encode_slice(ctx, job, band))
            .collect::<TaoResult<Vec<SliceOutput>>>()
    };
    match pool {
        Some(pool) => pool.install(run),
        None => run(),
    }
}

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::core::{
    BufferStatus, Frame, MediaInfo, MediaKind, Packet, PipelineConfig, PlaybackClock,
    PlaybackPosition, PlaybackState, PlayerError, PlayerEvent, PlayerState, Result,
};
use crate::player::convert::{self, AudioLayout, VideoLayout};
use crate::player::decoder::{DecodeOutput, DecoderFactory, MediaDecoder, SubmitStatus};
use crate::player::demuxer::{ByteSource, Demuxer, DemuxerFactory};
use crate::player::queue::{MediaQueue, PopError, PopTimeoutError, PushError};
use crate::player::sink::{AudioSink, VideoSink};
use crate::player::sync::{AudioAlign, PresentGate, SleepOutcome, Synchronizer, VideoAction};

fn log_ctx() -> String {
    format!("[pid:{}-tid:{:?}]", process::id(), thread::current().id())
}

pub type PacketQueue = MediaQueue<Packet>;
pub type FrameQueue = MediaQueue<Frame>;

/// 无丢弃窗口的哨兵值
const NO_DISCARD: i64 = i64::MIN;

/// Demuxer 线程命令
enum DemuxCommand {
    Seek(i64), // ms
    Stop,
}

/// 单条流的共享上下文：包队列归 demux 写/解码读，帧队列归解码写/投递读
struct StreamCtx {
    kind: MediaKind,
    index: usize,
    packets: Arc<PacketQueue>,
    frames: Arc<FrameQueue>,
    discard_until: AtomicI64, // seek 丢弃窗口（毫秒），NO_DISCARD 表示无
    failed: AtomicBool,
}

impl StreamCtx {
    fn new(kind: MediaKind, index: usize, config: &PipelineConfig) -> Arc<Self> {
        let (packet_budget, frame_budget, pl, fl) = match kind {
            MediaKind::Video => (
                config.video_packet_budget_bytes as u64,
                config.video_frame_budget_millis as u64,
                "video-packets",
                "video-frames",
            ),
            MediaKind::Audio => (
                config.audio_packet_budget_bytes as u64,
                config.audio_frame_budget_millis as u64,
                "audio-packets",
                "audio-frames",
            ),
        };
        Arc::new(Self {
            kind,
            index,
            packets: Arc::new(MediaQueue::new(pl, packet_budget)),
            frames: Arc::new(MediaQueue::new(fl, frame_budget)),
            discard_until: AtomicI64::new(NO_DISCARD),
            failed: AtomicBool::new(false),
        })
    }
}

/// 会话级共享状态
///
/// 时钟只有播放控制与音频投递环路两个写者，其余组件只读；
/// 其它一切通信走有界队列。
struct Shared {
    config: PipelineConfig,
    state: Mutex<PlayerState>,
    clock: PlaybackClock,
    gate: PresentGate,
    running: AtomicBool,
    flush_epoch: AtomicU64,
    finalized: AtomicBool, // 保证终止事件（完成/错误）只发一次
    buffering: AtomicBool,
    live_streams: AtomicUsize,
    completed: Mutex<Vec<MediaKind>>,
    resume_after_seek: Mutex<PlaybackState>,
    video: Mutex<Option<Arc<StreamCtx>>>,
    audio: Mutex<Option<Arc<StreamCtx>>>,
    event_tx: Sender<PlayerEvent>,
}

impl Shared {
    fn new(config: PipelineConfig, event_tx: Sender<PlayerEvent>) -> Self {
        Self {
            config,
            state: Mutex::new(PlayerState::default()),
            clock: PlaybackClock::new(),
            gate: PresentGate::new(),
            running: AtomicBool::new(false),
            flush_epoch: AtomicU64::new(0),
            finalized: AtomicBool::new(false),
            buffering: AtomicBool::new(false),
            live_streams: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
            resume_after_seek: Mutex::new(PlaybackState::Playing),
            video: Mutex::new(None),
            audio: Mutex::new(None),
            event_tx,
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn playback_state(&self) -> PlaybackState {
        self.state.lock().state
    }

    fn set_state(&self, next: PlaybackState) {
        let changed = {
            let mut st = self.state.lock();
            if st.state == next {
                false
            } else {
                st.state = next;
                true
            }
        };
        if changed {
            debug!("{} 状态切换 -> {:?}", log_ctx(), next);
            self.emit(PlayerEvent::StateChanged(next));
        }
    }

    fn video_ctx(&self) -> Option<Arc<StreamCtx>> {
        self.video.lock().clone()
    }

    fn audio_ctx(&self) -> Option<Arc<StreamCtx>> {
        self.audio.lock().clone()
    }

    fn each_ctx(&self, mut f: impl FnMut(&StreamCtx)) {
        if let Some(ctx) = self.video_ctx() {
            f(&ctx);
        }
        if let Some(ctx) = self.audio_ctx() {
            f(&ctx);
        }
    }

    fn close_all_queues(&self) {
        self.each_ctx(|ctx| {
            ctx.packets.close();
            ctx.frames.close();
        });
    }

    fn flush_all_queues(&self) {
        self.each_ctx(|ctx| {
            ctx.packets.flush();
            ctx.frames.flush();
        });
    }

    fn update_duration(&self, duration: i64) {
        let mut st = self.state.lock();
        if st.duration != Some(duration) {
            debug!("{} 📐 时长更新: {}ms", log_ctx(), duration);
            st.duration = Some(duration);
            if let Some(info) = &mut st.media_info {
                info.duration = Some(duration);
            }
        }
    }

    /// 管线级致命错误：进入 Error 终态，恰好发出一条 error 事件
    fn fail(&self, err: &PlayerError) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("{} ❌ 管线致命错误: {}", log_ctx(), err);
        self.running.store(false, Ordering::SeqCst);
        self.gate.cancel();
        self.close_all_queues();
        self.set_state(PlaybackState::Error);
        self.emit(PlayerEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// 全部流播完且帧队列排空：进入 Stopped，恰好发出一条完成事件
    fn finalize_complete(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{} 🏁 播放完成", log_ctx());
        self.running.store(false, Ordering::SeqCst);
        self.gate.cancel();
        self.close_all_queues();
        self.set_state(PlaybackState::Stopped);
        self.emit(PlayerEvent::PlaybackCompleted);
    }

    /// 单条流的致命错误：只禁用该流，另一条流（若有）继续
    fn fail_stream(&self, ctx: &StreamCtx, err: PlayerError) {
        if ctx.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            "{} ❌ {}流致命错误，已禁用: {}",
            log_ctx(),
            ctx.kind.as_str(),
            err
        );
        ctx.packets.close();
        ctx.frames.close();
        let remaining = self.live_streams.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.fail(&err);
        } else {
            info!("{} 另一条流继续播放", log_ctx());
        }
    }

    fn on_stream_complete(&self, kind: MediaKind) {
        let finished = {
            let mut done = self.completed.lock();
            if !done.contains(&kind) {
                info!("{} {}流播放完毕", log_ctx(), kind.as_str());
                done.push(kind);
            }
            done.len()
        };
        let live = self.live_streams.load(Ordering::SeqCst);
        if live > 0 && finished >= live {
            self.finalize_complete();
        }
    }
}

/// open 之后 play 之前暂存的组件
struct PendingSession {
    demuxer: Box<dyn Demuxer>,
    video: Option<(Arc<StreamCtx>, Box<dyn MediaDecoder>)>,
    audio: Option<(Arc<StreamCtx>, Box<dyn MediaDecoder>)>,
    video_sink: Option<Box<dyn VideoSink>>,
    audio_sink: Option<Box<dyn AudioSink>>,
}

/// 播放管理器 - 整体控制播放流程
///
/// 状态机: Idle → Opening → Ready → Playing ⇄ Paused，
/// Seeking 从 Playing/Paused 进入并回到原状态（后到的 seek 获胜），
/// Stopped/Error 为终态，stop() 对任意状态幂等。
pub struct PlaybackManager {
    config: PipelineConfig,
    demuxer_factory: Box<dyn DemuxerFactory>,
    decoder_factory: Box<dyn DecoderFactory>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
    shared: Arc<Shared>,
    pending: Option<PendingSession>,
    cmd_tx: Option<Sender<DemuxCommand>>,
    threads: Vec<JoinHandle<()>>,
}

impl PlaybackManager {
    pub fn new(
        config: PipelineConfig,
        demuxer_factory: Box<dyn DemuxerFactory>,
        decoder_factory: Box<dyn DecoderFactory>,
    ) -> Self {
        info!("{} 🎮 创建播放管理器...", log_ctx());
        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(Shared::new(config.clone(), event_tx.clone()));
        Self {
            config,
            demuxer_factory,
            decoder_factory,
            event_tx,
            event_rx,
            shared,
            pending: None,
            cmd_tx: None,
            threads: Vec::new(),
        }
    }

    /// 事件接收端（状态切换、缓冲、完成、错误）
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    /// 打开媒体源
    ///
    /// 探测容器、建立流表与解码器。成功后进入 Ready，play() 才启动各环路；
    /// 失败进入 Error 且不留任何工作线程。sink 为 None 的流不参与解码。
    pub fn open(
        &mut self,
        source: Box<dyn ByteSource>,
        video_sink: Option<Box<dyn VideoSink>>,
        audio_sink: Option<Box<dyn AudioSink>>,
    ) -> Result<MediaInfo> {
        info!("{} 📂 打开媒体源: {}", log_ctx(), source.description());

        // 停止并丢弃旧会话，整个状态机从头来
        self.stop();
        let shared = Arc::new(Shared::new(self.config.clone(), self.event_tx.clone()));
        self.shared = shared.clone();
        shared.set_state(PlaybackState::Opening);

        let demuxer = match self.demuxer_factory.open(source) {
            Ok(d) => d,
            Err(e) => {
                shared.fail(&e);
                return Err(e);
            }
        };

        let streams = demuxer.streams().to_vec();
        let media_info = demuxer.media_info();
        info!("{} 媒体信息: {:?}", log_ctx(), media_info);

        // 各取第一条视频/音频流；sink 缺席的流不解码
        let mut video_pair = None;
        if video_sink.is_some() {
            if let Some(desc) = streams.iter().find(|s| s.kind == MediaKind::Video) {
                match self.decoder_factory.create(desc) {
                    Ok(decoder) => {
                        info!("{} 视频解码器: {}", log_ctx(), decoder.info());
                        let ctx = StreamCtx::new(MediaKind::Video, desc.index, &self.config);
                        video_pair = Some((ctx, decoder));
                    }
                    Err(e) => {
                        warn!("{} 创建视频解码器失败，禁用该流: {}", log_ctx(), e);
                    }
                }
            }
        }
        let mut audio_pair = None;
        if audio_sink.is_some() {
            if let Some(desc) = streams.iter().find(|s| s.kind == MediaKind::Audio) {
                match self.decoder_factory.create(desc) {
                    Ok(decoder) => {
                        info!("{} 音频解码器: {}", log_ctx(), decoder.info());
                        let ctx = StreamCtx::new(MediaKind::Audio, desc.index, &self.config);
                        audio_pair = Some((ctx, decoder));
                    }
                    Err(e) => {
                        warn!("{} 创建音频解码器失败，禁用该流: {}", log_ctx(), e);
                    }
                }
            }
        }

        if video_pair.is_none() && audio_pair.is_none() {
            let e = PlayerError::NoPlayableStream;
            shared.fail(&e);
            return Err(e);
        }

        let live = video_pair.is_some() as usize + audio_pair.is_some() as usize;
        shared.live_streams.store(live, Ordering::SeqCst);
        *shared.video.lock() = video_pair.as_ref().map(|(c, _)| c.clone());
        *shared.audio.lock() = audio_pair.as_ref().map(|(c, _)| c.clone());

        {
            let mut st = shared.state.lock();
            st.duration = media_info.duration;
            st.media_info = Some(media_info.clone());
        }

        self.pending = Some(PendingSession {
            demuxer,
            video: video_pair,
            audio: audio_pair,
            video_sink,
            audio_sink,
        });

        shared.set_state(PlaybackState::Ready);
        Ok(media_info)
    }

    /// 播放 / 从暂停恢复
    pub fn play(&mut self) -> Result<()> {
        match self.shared.playback_state() {
            PlaybackState::Ready => {
                info!("{} 🎬 播放（启动各环路）", log_ctx());
                self.start_session()?;
                self.shared.clock.play();
                self.shared.gate.resume();
                self.shared.set_state(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Paused => {
                info!("{} 🎬 恢复播放", log_ctx());
                self.shared.clock.play();
                self.shared.gate.resume();
                self.shared.set_state(PlaybackState::Playing);
                Ok(())
            }
            PlaybackState::Playing => Ok(()),
            PlaybackState::Seeking => {
                // seek 结束后恢复为播放
                *self.shared.resume_after_seek.lock() = PlaybackState::Playing;
                self.shared.clock.play();
                self.shared.gate.resume();
                Ok(())
            }
            other => Err(PlayerError::InvalidState(format!(
                "{:?} 状态不能 play",
                other
            ))),
        }
    }

    /// 暂停：时钟停走，队列继续填充到各自预算上限，sink 停止供数
    pub fn pause(&self) -> Result<()> {
        match self.shared.playback_state() {
            PlaybackState::Playing => {
                info!("{} ⏸ 暂停", log_ctx());
                self.shared.clock.pause();
                self.shared.gate.pause();
                self.shared.set_state(PlaybackState::Paused);
                Ok(())
            }
            PlaybackState::Paused => Ok(()),
            PlaybackState::Seeking => {
                *self.shared.resume_after_seek.lock() = PlaybackState::Paused;
                self.shared.clock.pause();
                self.shared.gate.pause();
                Ok(())
            }
            other => Err(PlayerError::InvalidState(format!(
                "{:?} 状态不能 pause",
                other
            ))),
        }
    }

    /// Seek 到目标位置（毫秒）
    ///
    /// 冲洗全部队列与解码器，demux 线程执行容器级 seek 后恢复原状态；
    /// seek 进行中再次 seek 时后到者获胜。
    pub fn seek(&self, target_millis: i64) -> Result<()> {
        let state = self.shared.playback_state();
        match state {
            PlaybackState::Playing | PlaybackState::Paused => {
                *self.shared.resume_after_seek.lock() = state;
            }
            PlaybackState::Seeking => {} // 保留已记录的恢复状态
            other => {
                return Err(PlayerError::InvalidState(format!(
                    "{:?} 状态不能 seek",
                    other
                )))
            }
        }
        info!("{} 🎯 Seek 到: {}ms", log_ctx(), target_millis);
        self.shared.set_state(PlaybackState::Seeking);

        // 丢弃窗口：目标之前的帧在解码侧丢弃
        self.shared.each_ctx(|ctx| {
            ctx.discard_until.store(target_millis, Ordering::Release);
        });

        // 解码器 flush 信号 + 冲洗全部队列（同时唤醒所有阻塞等待）
        self.shared.flush_epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.flush_all_queues();
        self.shared.completed.lock().clear();

        // 时钟预置到目标，首个到达的音频/视频帧再精确锚定
        self.shared.clock.set_time(target_millis);
        self.shared.state.lock().position = target_millis;
        self.shared.gate.interrupt();

        match &self.cmd_tx {
            Some(tx) => {
                if tx.send(DemuxCommand::Seek(target_millis)).is_err() {
                    warn!("{} ⚠ Seek 命令无法送达 demux 线程", log_ctx());
                }
                Ok(())
            }
            None => Err(PlayerError::InvalidState("demux 线程未启动".to_string())),
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        if rate <= 0.0 || !rate.is_finite() {
            return Err(PlayerError::InvalidState(format!(
                "非法播放速率: {}",
                rate
            )));
        }
        info!("{} ⏩ 播放速率: {:.2}x", log_ctx(), rate);
        self.shared.clock.set_rate(rate);
        Ok(())
    }

    /// 设置音量
    pub fn set_volume(&self, volume: f32) {
        self.shared.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    /// 停止播放并释放所有组件（幂等）
    pub fn stop(&mut self) {
        let shared = self.shared.clone();
        let had_threads = !self.threads.is_empty();
        if had_threads {
            info!("{} ⏹ 停止播放", log_ctx());
        }
        shared.running.store(false, Ordering::SeqCst);
        shared.gate.cancel();
        shared.close_all_queues();
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(DemuxCommand::Stop);
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        // 环路都已退出，丢弃队列里残留的缓冲（pop 继续返回 closed）
        shared.each_ctx(|ctx| {
            ctx.packets.flush();
            ctx.frames.flush();
        });
        if let Some(mut pending) = self.pending.take() {
            pending.demuxer.close();
        }
        shared.clock.pause();
        // Error 是终态，stop 只释放资源不覆盖它
        let prev = shared.playback_state();
        if prev != PlaybackState::Idle && prev != PlaybackState::Error {
            shared.state.lock().position = 0;
            shared.set_state(PlaybackState::Stopped);
        }
        if had_threads {
            info!("{} ✅ 停止完成，所有线程已清理", log_ctx());
        }
    }

    /// 当前状态
    pub fn current_state(&self) -> PlaybackState {
        self.shared.playback_state()
    }

    /// 状态快照（附带时钟位置）
    pub fn player_state(&self) -> PlayerState {
        let mut st = self.shared.state.lock().clone();
        if !st.state.is_terminal() && st.state != PlaybackState::Seeking {
            st.position = self.shared.clock.now().max(0);
        }
        st
    }

    /// 当前位置与各流缓冲量
    pub fn position(&self) -> PlaybackPosition {
        let st = self.shared.state.lock();
        let position = if st.state == PlaybackState::Seeking || st.state.is_terminal() {
            st.position
        } else {
            self.shared.clock.now().max(0)
        };
        PlaybackPosition {
            position,
            duration: st.duration,
            video_buffered: self
                .shared
                .video_ctx()
                .map(|c| c.frames.occupied() as i64)
                .unwrap_or(0),
            audio_buffered: self
                .shared
                .audio_ctx()
                .map(|c| c.frames.occupied() as i64)
                .unwrap_or(0),
        }
    }

    /// 总时长（毫秒），未知/直播返回 None
    pub fn duration(&self) -> Option<i64> {
        self.shared.state.lock().duration
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.shared.state.lock().media_info.clone()
    }

    /// 缓冲状态信息（用于监控和调试）
    pub fn buffer_status(&self) -> BufferStatus {
        let mut status = BufferStatus {
            is_buffering: self.shared.buffering.load(Ordering::SeqCst),
            ..BufferStatus::default()
        };
        if let Some(ctx) = self.shared.video_ctx() {
            status.video_packet_bytes = ctx.packets.occupied() as usize;
            status.video_frame_millis = ctx.frames.occupied() as i64;
        }
        if let Some(ctx) = self.shared.audio_ctx() {
            status.audio_packet_bytes = ctx.packets.occupied() as usize;
            status.audio_frame_millis = ctx.frames.occupied() as i64;
        }
        status
    }

    /// 启动全部工作环路（demux / 每流解码 / 每流投递）
    fn start_session(&mut self) -> Result<()> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| PlayerError::InvalidState("没有已打开的媒体源".to_string()))?;

        let shared = self.shared.clone();
        shared.running.store(true, Ordering::SeqCst);

        let (cmd_tx, cmd_rx) = unbounded::<DemuxCommand>();
        self.cmd_tx = Some(cmd_tx);

        let video_layout = pending
            .video_sink
            .as_ref()
            .map(|s| s.preferred_layout())
            .unwrap_or_else(VideoLayout::rgba);
        let audio_layout = pending
            .audio_sink
            .as_ref()
            .map(|s| s.preferred_layout())
            .unwrap_or_else(|| AudioLayout::stereo_f32(48000));

        // 解封装环路
        {
            let shared = shared.clone();
            let demuxer = pending.demuxer;
            self.threads
                .push(thread::spawn(move || demux_loop(shared, demuxer, cmd_rx)));
        }

        // 解码环路（每流一个）
        for pair in [pending.video, pending.audio] {
            if let Some((ctx, decoder)) = pair {
                let shared = shared.clone();
                self.threads.push(thread::spawn(move || {
                    decode_loop(shared, ctx, decoder, video_layout, audio_layout)
                }));
            }
        }

        // 投递环路（每流一个）
        if let (Some(sink), Some(ctx)) = (pending.video_sink, shared.video_ctx()) {
            let shared = shared.clone();
            self.threads
                .push(thread::spawn(move || video_delivery_loop(shared, ctx, sink)));
        }
        if let (Some(sink), Some(ctx)) = (pending.audio_sink, shared.audio_ctx()) {
            let shared = shared.clone();
            self.threads
                .push(thread::spawn(move || audio_delivery_loop(shared, ctx, sink)));
        }

        Ok(())
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}

// ==================== 解封装环路 ====================

fn demux_loop(shared: Arc<Shared>, mut demuxer: Box<dyn Demuxer>, cmd_rx: Receiver<DemuxCommand>) {
    info!("{} 🎬 解封装线程启动: {}", log_ctx(), demuxer.description());

    let video_ctx = shared.video_ctx();
    let audio_ctx = shared.audio_ctx();
    let mut corrupt_streak: u32 = 0;
    let mut io_retries: u32 = 0;
    let mut at_eof = false;
    let mut packet_count: u64 = 0;

    'main: while shared.running.load(Ordering::SeqCst) {
        // 优先处理命令；seek 命令堆积时只执行最后一个
        let mut last_seek: Option<i64> = None;
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                DemuxCommand::Seek(target) => {
                    if let Some(old) = last_seek.replace(target) {
                        debug!("{} 跳过被覆盖的 seek 命令: {}ms", log_ctx(), old);
                    }
                }
                DemuxCommand::Stop => break 'main,
            }
        }

        if let Some(target) = last_seek {
            info!("{} ⏩ 执行容器 seek: {}ms", log_ctx(), target);
            match demuxer.seek(target) {
                Ok(()) => {
                    at_eof = false;
                    corrupt_streak = 0;
                    io_retries = 0;
                }
                Err(e) => {
                    // 容器 seek 失败不终止播放，从当前位置继续
                    warn!("{} ⚠ 容器 seek 失败: {}", log_ctx(), e);
                }
            }
            // 没有更新的 seek 排队时才恢复状态（后到者获胜）
            if cmd_rx.is_empty() && shared.playback_state() == PlaybackState::Seeking {
                let resume = *shared.resume_after_seek.lock();
                shared.state.lock().position = target;
                shared.set_state(resume);
                info!("{} ✅ Seek 完成: {}ms，恢复为 {:?}", log_ctx(), target, resume);
            }
            continue;
        }

        if at_eof {
            // EOF 后保持线程存活等待 Seek/Stop，不忙等
            thread::sleep(Duration::from_millis(20));
            continue;
        }

        match demuxer.read_packet() {
            Ok(Some(packet)) => {
                corrupt_streak = 0;
                io_retries = 0;
                packet_count += 1;

                // 有命令排队时该包多半属于旧位置，不下传，先回去处理命令
                if !cmd_rx.is_empty() {
                    continue;
                }

                let ctx = match packet.kind {
                    MediaKind::Video => video_ctx.as_ref(),
                    MediaKind::Audio => audio_ctx.as_ref(),
                };
                match ctx {
                    Some(ctx) if ctx.index == packet.stream_index => {
                        if packet.discard {
                            debug!(
                                "{} 损坏可恢复包 pts={}ms，作为有损提示下传",
                                log_ctx(),
                                packet.pts
                            );
                        }
                        // 有界队列背压：预算占满时在这里阻塞
                        match ctx.packets.push(packet) {
                            Ok(()) => {}
                            Err(PushError::Flushed(_)) => {
                                debug!("{} 丢弃 seek 旧代数据包", log_ctx());
                            }
                            // 该流已禁用或会话停止
                            Err(PushError::Closed(_)) => {
                                if !shared.running.load(Ordering::SeqCst) {
                                    break 'main;
                                }
                            }
                        }
                    }
                    // 未启用的流直接丢弃
                    _ => {}
                }

                // 周期性刷新时长元数据（索引信息可能比头部更准）
                if packet_count % 64 == 0 {
                    if let Some(d) = demuxer.duration_hint() {
                        shared.update_duration(d);
                    }
                }
            }
            Ok(None) => {
                info!(
                    "{} 📄 到达流末尾，共读取 {} 个包，等待命令（Seek/Stop）",
                    log_ctx(),
                    packet_count
                );
                if let Some(ctx) = &video_ctx {
                    ctx.packets.finish();
                }
                if let Some(ctx) = &audio_ctx {
                    ctx.packets.finish();
                }
                if let Some(d) = demuxer.duration_hint() {
                    shared.update_duration(d);
                }
                at_eof = true;
            }
            Err(PlayerError::DemuxCorrupt(msg)) => {
                corrupt_streak += 1;
                warn!(
                    "{} ⚠ 跳过损坏数据包（连续 {} 次）: {}",
                    log_ctx(),
                    corrupt_streak,
                    msg
                );
                if corrupt_streak > shared.config.max_corrupt_skips {
                    shared.fail(&PlayerError::DemuxFatal(format!(
                        "连续 {} 个损坏包，放弃: {}",
                        corrupt_streak, msg
                    )));
                    break;
                }
            }
            Err(PlayerError::IoError(e)) => {
                io_retries += 1;
                if io_retries > shared.config.io_retry_max {
                    shared.fail(&PlayerError::DemuxFatal(format!(
                        "字节源 IO 错误重试 {} 次后放弃: {}",
                        io_retries - 1,
                        e
                    )));
                    break;
                }
                let backoff = shared.config.io_retry_backoff_millis * io_retries as u64;
                warn!(
                    "{} ⚠ 字节源 IO 错误，{}ms 后重试（第 {} 次）: {}",
                    log_ctx(),
                    backoff,
                    io_retries,
                    e
                );
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => {
                shared.fail(&e);
                break;
            }
        }
    }

    demuxer.close();
    info!("{} 🛑 解封装线程退出（共读取 {} 个包）", log_ctx(), packet_count);
}

// ==================== 解码环路 ====================

fn decode_loop(
    shared: Arc<Shared>,
    ctx: Arc<StreamCtx>,
    mut decoder: Box<dyn MediaDecoder>,
    video_layout: VideoLayout,
    audio_layout: AudioLayout,
) {
    info!("{} 🎬 {}解码线程启动", log_ctx(), ctx.kind.as_str());

    let mut local_epoch = shared.flush_epoch.load(Ordering::Acquire);
    let mut eof_signaled = false;

    'main: while shared.running.load(Ordering::SeqCst) {
        match ctx.packets.pop() {
            Ok(packet) => {
                // seek 后先 flush 解码器再喂新包（包队列已被冲洗，该包属于新位置）
                let epoch = shared.flush_epoch.load(Ordering::Acquire);
                if epoch != local_epoch {
                    local_epoch = epoch;
                    debug!("{} 🔄 {}解码器 flush", log_ctx(), ctx.kind.as_str());
                    decoder.flush();
                    eof_signaled = false;
                }

                if packet.discard {
                    debug!("{} 有损提示包提交给{}解码器", log_ctx(), ctx.kind.as_str());
                }

                // 提交；拒收时先排空输出再重试
                let mut attempts = 0;
                let mut pending = Some(packet);
                while let Some(pkt) = pending.take() {
                    match decoder.submit(pkt) {
                        Ok(SubmitStatus::Accepted) => {}
                        Ok(SubmitStatus::Rejected { packet, reason }) => {
                            attempts += 1;
                            if attempts > 2 {
                                warn!("{} 解码器连续拒收，丢弃该包: {}", log_ctx(), reason);
                                break;
                            }
                            if !drain_frames(&shared, &ctx, decoder.as_mut(), &video_layout, &audio_layout) {
                                break 'main;
                            }
                            pending = Some(packet);
                        }
                        Err(e) if e.is_recoverable() => {
                            warn!("{} ⚠ {}", log_ctx(), e);
                            break;
                        }
                        Err(e) => {
                            shared.fail_stream(&ctx, e);
                            break 'main;
                        }
                    }
                }

                if !drain_frames(&shared, &ctx, decoder.as_mut(), &video_layout, &audio_layout) {
                    break 'main;
                }
            }
            Err(PopError::Finished) => {
                if !eof_signaled {
                    eof_signaled = true;
                    // 排空参考帧缓冲
                    decoder.submit_eof();
                    if !drain_frames(&shared, &ctx, decoder.as_mut(), &video_layout, &audio_layout) {
                        break 'main;
                    }
                    ctx.frames.finish();
                    info!("{} {}流解码完成", log_ctx(), ctx.kind.as_str());
                }
                // 挂起等待 seek 恢复供数或会话关闭
                match ctx.packets.wait_reopen() {
                    Ok(()) => continue,
                    Err(_) => break,
                }
            }
            Err(PopError::Closed) => break,
        }
    }

    info!("{} 🛑 {}解码线程退出", log_ctx(), ctx.kind.as_str());
}

/// 取回解码器输出、格式转换、过滤 seek 丢弃窗口后入帧队列。
/// 返回 false 表示解码线程应退出。
fn drain_frames(
    shared: &Shared,
    ctx: &StreamCtx,
    decoder: &mut dyn MediaDecoder,
    video_layout: &VideoLayout,
    audio_layout: &AudioLayout,
) -> bool {
    loop {
        match decoder.retrieve() {
            Ok(DecodeOutput::Frame(frame)) => {
                let converted = match &frame {
                    Frame::Video(v) => convert::convert_video(v, video_layout).map(Frame::Video),
                    Frame::Audio(a) => convert::convert_audio(a, audio_layout).map(Frame::Audio),
                };
                let out = match converted {
                    Ok(f) => f,
                    Err(e) => {
                        // 转换失败对该流是致命的
                        shared.fail_stream(ctx, e);
                        return false;
                    }
                };

                // seek 丢弃窗口：目标前超过一帧时长的帧不进队列
                let target = ctx.discard_until.load(Ordering::Acquire);
                if target != NO_DISCARD {
                    if out.pts() < target && target - out.pts() >= out.duration().max(1) {
                        debug!(
                            "{} 🗑 丢弃 seek 目标前的{}帧 pts={}ms（目标 {}ms）",
                            log_ctx(),
                            ctx.kind.as_str(),
                            out.pts(),
                            target
                        );
                        continue;
                    }
                    ctx.discard_until.store(NO_DISCARD, Ordering::Release);
                }

                match ctx.frames.push(out) {
                    Ok(()) => {}
                    // 阻塞期间发生了 seek，帧属于旧代
                    Err(PushError::Flushed(_)) => continue,
                    // 帧队列已关闭（停止或该流被禁用）
                    Err(PushError::Closed(_)) => return false,
                }
            }
            Ok(DecodeOutput::NeedMoreInput) | Ok(DecodeOutput::EndOfStream) => return true,
            Err(e) if e.is_recoverable() => {
                warn!("{} ⚠ {}", log_ctx(), e);
                continue;
            }
            Err(e) => {
                shared.fail_stream(ctx, e);
                return false;
            }
        }
    }
}

// ==================== 视频投递环路 ====================

fn video_delivery_loop(shared: Arc<Shared>, ctx: Arc<StreamCtx>, mut sink: Box<dyn VideoSink>) {
    info!("{} 🖼 视频投递线程启动", log_ctx());

    let sync = Synchronizer::new(shared.clock.clone(), &shared.config);
    let grace = Duration::from_millis(shared.config.underrun_grace_millis);
    let video_only = shared.audio_ctx().is_none();
    let mut buffering = false;

    'main: loop {
        if !shared.gate.wait_while_paused() {
            break;
        }
        let pop_epoch = shared.flush_epoch.load(Ordering::Acquire);
        match ctx.frames.pop_timeout(grace) {
            Ok(Frame::Video(frame)) => {
                if buffering {
                    buffering = false;
                    shared.buffering.store(false, Ordering::SeqCst);
                    shared.emit(PlayerEvent::BufferingEnded(MediaKind::Video));
                }
                // 纯视频流：首帧到达锚定时钟（无音频可校准时的策略）
                if video_only && shared.clock.anchor(frame.pts) {
                    debug!("{} 🕰 视频首帧锚定时钟: {}ms", log_ctx(), frame.pts);
                }

                loop {
                    // seek 冲洗之后手头的帧已过期
                    if shared.flush_epoch.load(Ordering::Acquire) != pop_epoch {
                        continue 'main;
                    }
                    if !shared.gate.wait_while_paused() {
                        break 'main;
                    }
                    match sync.schedule_video(frame.pts) {
                        VideoAction::PresentNow => {
                            sink.present(&frame);
                            let drift = sync.video_drift(frame.pts);
                            if sync.needs_resync(drift) {
                                // 时钟校正事件：控制侧仅做诊断记录
                                info!("{} ⏱ 视频漂移 {}ms 超过重同步阈值", log_ctx(), drift);
                            }
                            continue 'main;
                        }
                        VideoAction::PresentAfter(wait) => match shared.gate.sleep(wait) {
                            SleepOutcome::Completed | SleepOutcome::Interrupted => continue,
                            SleepOutcome::Cancelled => break 'main,
                        },
                        VideoAction::Drop { behind_millis } => {
                            debug!(
                                "{} 🗑 丢弃过期视频帧 pts={}ms（落后 {}ms）",
                                log_ctx(),
                                frame.pts,
                                behind_millis
                            );
                            continue 'main;
                        }
                    }
                }
            }
            Ok(other) => {
                warn!(
                    "{} 视频帧队列收到{}帧，已忽略",
                    log_ctx(),
                    other.kind().as_str()
                );
            }
            Err(PopTimeoutError::Timeout) => {
                if !buffering && shared.playback_state() == PlaybackState::Playing {
                    buffering = true;
                    shared.buffering.store(true, Ordering::SeqCst);
                    warn!("{} ⏳ 视频帧队列欠载，进入缓冲", log_ctx());
                    shared.emit(PlayerEvent::BufferingStarted(MediaKind::Video));
                }
            }
            Err(PopTimeoutError::Finished) => {
                shared.on_stream_complete(MediaKind::Video);
                match ctx.frames.wait_reopen() {
                    Ok(()) => continue,
                    Err(_) => break,
                }
            }
            Err(PopTimeoutError::Closed) => break,
        }
    }

    info!("{} 🛑 视频投递线程退出", log_ctx());
}

// ==================== 音频投递环路 ====================

fn audio_delivery_loop(shared: Arc<Shared>, ctx: Arc<StreamCtx>, mut sink: Box<dyn AudioSink>) {
    info!("{} 🔊 音频投递线程启动", log_ctx());

    let sync = Synchronizer::new(shared.clock.clone(), &shared.config);
    let grace = Duration::from_millis(shared.config.underrun_grace_millis);
    let mut buffering = false;

    'main: loop {
        if !shared.gate.wait_while_paused() {
            break;
        }
        let pop_epoch = shared.flush_epoch.load(Ordering::Acquire);
        match ctx.frames.pop_timeout(grace) {
            Ok(Frame::Audio(frame)) => {
                if buffering {
                    buffering = false;
                    shared.buffering.store(false, Ordering::SeqCst);
                    shared.emit(PlayerEvent::BufferingEnded(MediaKind::Audio));
                }
                // 音频主时钟：首帧锚定
                if shared.clock.anchor(frame.pts) {
                    debug!("{} 🕰 音频首帧锚定时钟: {}ms", log_ctx(), frame.pts);
                }

                // 节拍控制：不让送入 sink 的数据领先时钟太多
                loop {
                    if shared.flush_epoch.load(Ordering::Acquire) != pop_epoch {
                        continue 'main;
                    }
                    if !shared.gate.wait_while_paused() {
                        break 'main;
                    }
                    match sync.audio_pacing_wait(frame.pts) {
                        Some(wait) => match shared.gate.sleep(wait) {
                            SleepOutcome::Completed | SleepOutcome::Interrupted => continue,
                            SleepOutcome::Cancelled => break 'main,
                        },
                        None => break,
                    }
                }

                // 音频永不丢弃：即便落后也送入 sink，由时钟校正吸收
                let volume = shared.state.lock().volume;
                sink.set_volume(volume);
                if let Err(e) = sink.enqueue(&frame) {
                    shared.fail_stream(&ctx, e);
                    break;
                }

                // sink 是节拍源：其消费位置反馈回主时钟
                if let Some(position) = sink.played_position() {
                    if let AudioAlign::ClockCorrected { drift_millis } = sync.align_audio(position)
                    {
                        info!(
                            "{} ⏱ 时钟重同步: 音频位置反馈漂移 {}ms",
                            log_ctx(),
                            drift_millis
                        );
                    }
                }
            }
            Ok(other) => {
                warn!(
                    "{} 音频帧队列收到{}帧，已忽略",
                    log_ctx(),
                    other.kind().as_str()
                );
            }
            Err(PopTimeoutError::Timeout) => {
                if !buffering && shared.playback_state() == PlaybackState::Playing {
                    buffering = true;
                    shared.buffering.store(true, Ordering::SeqCst);
                    warn!("{} ⏳ 音频帧队列欠载，进入缓冲", log_ctx());
                    shared.emit(PlayerEvent::BufferingStarted(MediaKind::Audio));
                }
            }
            Err(PopTimeoutError::Finished) => {
                shared.on_stream_complete(MediaKind::Audio);
                match ctx.frames.wait_reopen() {
                    Ok(()) => continue,
                    Err(_) => break,
                }
            }
            Err(PopTimeoutError::Closed) => break,
        }
    }

    info!("{} 🛑 音频投递线程退出", log_ctx());
}

//! 集成测试公共桩：脚本化解封装器、直通解码器、记录型 sink

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use playcore::player::convert::AudioLayout;
use playcore::{
    AudioFrame, AudioSamples, ByteSource, DecodeOutput, Demuxer, DemuxerFactory, DecoderFactory,
    Frame, MediaDecoder, MediaInfo, MediaKind, Packet, PipelineConfig, PixelFormat, PlaybackManager,
    PlayerError, PlayerEvent, Result, SampleFormat, StreamDescriptor, SubmitStatus, VideoFrame,
    VideoSink,
};

pub const VIDEO_INTERVAL: i64 = 40; // 25fps
pub const AUDIO_INTERVAL: i64 = 20;
pub const KEYFRAME_EVERY: usize = 5; // 每 200ms 一个关键帧
pub const AUDIO_RATE: u32 = 8000;

pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ==================== 媒体脚本 ====================

/// 合成媒体的脚本：视频流索引 0，音频流索引 1
#[derive(Clone, Default)]
pub struct MediaSpec {
    pub duration: i64,
    pub with_video: bool,
    pub with_audio: bool,
    /// 合并序列号处报一次可恢复解封装错误并跳过该包
    pub corrupt_at: Vec<usize>,
    /// 合并序列号处的包带 discard 标记（有损提示）
    pub discard_at: Vec<usize>,
    /// 合并序列号处先报一次 IO 错误再正常返回
    pub io_errors_at: Vec<usize>,
}

impl MediaSpec {
    pub fn av(duration: i64) -> Self {
        Self {
            duration,
            with_video: true,
            with_audio: true,
            ..Self::default()
        }
    }

    pub fn video_only(duration: i64) -> Self {
        Self {
            duration,
            with_video: true,
            ..Self::default()
        }
    }

    fn build_packets(&self) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.with_video {
            let mut i = 0usize;
            let mut pts = 0i64;
            while pts < self.duration {
                packets.push(Packet {
                    stream_index: 0,
                    kind: MediaKind::Video,
                    pts,
                    dts: pts,
                    duration: VIDEO_INTERVAL,
                    keyframe: i % KEYFRAME_EVERY == 0,
                    discard: false,
                    data: vec![0xAB; 64],
                });
                i += 1;
                pts += VIDEO_INTERVAL;
            }
        }
        if self.with_audio {
            let mut pts = 0i64;
            while pts < self.duration {
                packets.push(Packet {
                    stream_index: 1,
                    kind: MediaKind::Audio,
                    pts,
                    dts: pts,
                    duration: AUDIO_INTERVAL,
                    keyframe: true,
                    discard: false,
                    data: vec![0xCD; 32],
                });
                pts += AUDIO_INTERVAL;
            }
        }
        // 按 pts 合并，同刻视频在前
        packets.sort_by_key(|p| (p.pts, p.stream_index));
        for (i, p) in packets.iter_mut().enumerate() {
            if self.discard_at.contains(&i) {
                p.discard = true;
            }
        }
        packets
    }
}

pub struct ScriptedDemuxer {
    spec: MediaSpec,
    packets: Vec<Packet>,
    streams: Vec<StreamDescriptor>,
    cursor: usize,
    corrupt_reported: HashSet<usize>,
    io_reported: HashSet<usize>,
}

impl ScriptedDemuxer {
    pub fn new(spec: MediaSpec) -> Self {
        let packets = spec.build_packets();
        let mut streams = Vec::new();
        if spec.with_video {
            streams.push(StreamDescriptor::video(0, "fakevideo", 4, 4, 25.0));
        }
        if spec.with_audio {
            streams.push(StreamDescriptor::audio(1, "fakeaudio", AUDIO_RATE, 1));
        }
        Self {
            spec,
            packets,
            streams,
            cursor: 0,
            corrupt_reported: HashSet::new(),
            io_reported: HashSet::new(),
        }
    }
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn media_info(&self) -> MediaInfo {
        MediaInfo {
            duration: Some(self.spec.duration),
            width: 4,
            height: 4,
            fps: 25.0,
            video_codec: if self.spec.with_video {
                "fakevideo".to_string()
            } else {
                "none".to_string()
            },
            audio_codec: if self.spec.with_audio {
                "fakeaudio".to_string()
            } else {
                "none".to_string()
            },
            sample_rate: AUDIO_RATE,
            channels: 1,
        }
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let i = self.cursor;
        if i >= self.packets.len() {
            return Ok(None);
        }
        if self.spec.io_errors_at.contains(&i) && self.io_reported.insert(i) {
            return Err(PlayerError::IoError(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "模拟 IO 抖动",
            )));
        }
        if self.spec.corrupt_at.contains(&i) && self.corrupt_reported.insert(i) {
            self.cursor += 1;
            return Err(PlayerError::DemuxCorrupt("模拟损坏数据包".to_string()));
        }
        self.cursor += 1;
        Ok(Some(self.packets[i].clone()))
    }

    fn seek(&mut self, target_millis: i64) -> Result<()> {
        // 定位到目标之前最近的关键帧
        let mut best: Option<usize> = None;
        for (i, p) in self.packets.iter().enumerate() {
            if p.keyframe && p.pts <= target_millis && (p.kind == MediaKind::Video || !self.spec.with_video) {
                best = Some(i);
            }
            if p.pts > target_millis {
                break;
            }
        }
        self.cursor = best.unwrap_or(0);
        Ok(())
    }

    fn description(&self) -> String {
        "脚本化 Demuxer".to_string()
    }
}

/// 按魔数探测的工厂：前 4 字节须为 FAKE
pub struct ScriptedDemuxerFactory {
    pub spec: MediaSpec,
}

impl DemuxerFactory for ScriptedDemuxerFactory {
    fn open(&self, mut source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
        let mut magic = [0u8; 4];
        let mut read = 0;
        while read < 4 {
            let n = source.read(&mut magic[read..])?;
            if n == 0 {
                break;
            }
            read += n;
        }
        if read < 4 {
            return Err(PlayerError::Truncated("容器头不足 4 字节".to_string()));
        }
        if &magic != b"FAKE" {
            return Err(PlayerError::Unrecognized("未知容器魔数".to_string()));
        }
        Ok(Box::new(ScriptedDemuxer::new(self.spec.clone())))
    }
}

pub fn fake_source() -> Box<dyn ByteSource> {
    Box::new(Cursor::new(b"FAKE0001".to_vec()))
}

pub fn garbage_source() -> Box<dyn ByteSource> {
    Box::new(Cursor::new(b"JUNKJUNK".to_vec()))
}

pub fn truncated_source() -> Box<dyn ByteSource> {
    Box::new(Cursor::new(b"FA".to_vec()))
}

// ==================== 直通解码器 ====================

#[derive(Clone, Default)]
pub struct DecoderBehavior {
    /// 提交该 pts 的视频包时报致命解码错误（模拟不支持的档次）
    pub fatal_video_at: Option<i64>,
    /// 参考帧模拟：积压 N 个包后才出第一帧
    pub reorder_delay: usize,
}

pub struct FakeDecoderFactory {
    pub behavior: DecoderBehavior,
}

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn MediaDecoder>> {
        Ok(Box::new(FakeDecoder {
            kind: descriptor.kind,
            stream_index: descriptor.index,
            behavior: self.behavior.clone(),
            backlog: VecDeque::new(),
            pending: VecDeque::new(),
            eof: false,
        }))
    }
}

pub struct FakeDecoder {
    kind: MediaKind,
    stream_index: usize,
    behavior: DecoderBehavior,
    backlog: VecDeque<Packet>,
    pending: VecDeque<Frame>,
    eof: bool,
}

impl FakeDecoder {
    fn make_frame(&self, packet: &Packet) -> Frame {
        match self.kind {
            MediaKind::Video => Frame::Video(VideoFrame {
                stream_index: self.stream_index,
                pts: packet.pts,
                duration: packet.duration,
                width: 4,
                height: 4,
                format: PixelFormat::YUV420P,
                stride: 0,
                // 4x4 YUV420P: Y 16 字节 + U 4 + V 4
                data: vec![128; 24],
            }),
            MediaKind::Audio => {
                let count = (packet.duration * AUDIO_RATE as i64 / 1000) as usize;
                Frame::Audio(AudioFrame {
                    stream_index: self.stream_index,
                    pts: packet.pts,
                    duration: packet.duration,
                    sample_rate: AUDIO_RATE,
                    channels: 1,
                    samples: AudioSamples::F32(vec![0.1; count]),
                })
            }
        }
    }
}

impl MediaDecoder for FakeDecoder {
    fn submit(&mut self, packet: Packet) -> Result<SubmitStatus> {
        if self.kind == MediaKind::Video && self.behavior.fatal_video_at == Some(packet.pts) {
            return Err(PlayerError::DecodeFatal("不支持的码流档次".to_string()));
        }
        if packet.discard {
            return Err(PlayerError::DecodeRecoverable(
                "有损提示包解码失败".to_string(),
            ));
        }
        self.backlog.push_back(packet);
        while self.backlog.len() > self.behavior.reorder_delay {
            let pkt = self.backlog.pop_front().unwrap();
            let frame = self.make_frame(&pkt);
            self.pending.push_back(frame);
        }
        Ok(SubmitStatus::Accepted)
    }

    fn submit_eof(&mut self) {
        self.eof = true;
        while let Some(pkt) = self.backlog.pop_front() {
            let frame = self.make_frame(&pkt);
            self.pending.push_back(frame);
        }
    }

    fn retrieve(&mut self) -> Result<DecodeOutput> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(DecodeOutput::Frame(frame));
        }
        if self.eof {
            Ok(DecodeOutput::EndOfStream)
        } else {
            Ok(DecodeOutput::NeedMoreInput)
        }
    }

    fn flush(&mut self) {
        self.backlog.clear();
        self.pending.clear();
        self.eof = false;
    }

    fn info(&self) -> String {
        format!("直通{}解码", self.kind.as_str())
    }
}

// ==================== 记录型 sink ====================

#[derive(Clone, Default)]
pub struct Recording {
    entries: Arc<Mutex<Vec<(i64, Instant)>>>,
}

impl Recording {
    pub fn push(&self, pts: i64) {
        self.entries.lock().push((pts, Instant::now()));
    }

    pub fn pts_list(&self) -> Vec<i64> {
        self.entries.lock().iter().map(|(p, _)| *p).collect()
    }

    pub fn entries(&self) -> Vec<(i64, Instant)> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

pub struct RecordingVideoSink {
    pub rec: Recording,
}

impl VideoSink for RecordingVideoSink {
    fn present(&mut self, frame: &VideoFrame) {
        assert_eq!(frame.format, PixelFormat::RGBA);
        self.rec.push(frame.pts);
    }
}

pub struct RecordingAudioSink {
    pub rec: Recording,
}

impl playcore::AudioSink for RecordingAudioSink {
    fn enqueue(&mut self, frame: &AudioFrame) -> Result<()> {
        self.rec.push(frame.pts);
        Ok(())
    }

    fn preferred_layout(&self) -> AudioLayout {
        AudioLayout {
            sample_rate: AUDIO_RATE,
            channels: 2,
            format: SampleFormat::F32,
        }
    }
}

// ==================== 搭建与等待辅助 ====================

pub struct TestPlayer {
    pub manager: PlaybackManager,
    pub events: Receiver<PlayerEvent>,
    pub video: Recording,
    pub audio: Recording,
}

pub fn manager_with(spec: MediaSpec, behavior: DecoderBehavior) -> PlaybackManager {
    init_logs();
    PlaybackManager::new(
        PipelineConfig::default(),
        Box::new(ScriptedDemuxerFactory { spec }),
        Box::new(FakeDecoderFactory { behavior }),
    )
}

/// 打开合成媒体并接好记录型 sink
pub fn open_player(spec: MediaSpec, behavior: DecoderBehavior) -> TestPlayer {
    let with_video = spec.with_video;
    let with_audio = spec.with_audio;
    let mut manager = manager_with(spec, behavior);
    let events = manager.events();
    let video = Recording::default();
    let audio = Recording::default();
    let video_sink: Option<Box<dyn VideoSink>> = if with_video {
        Some(Box::new(RecordingVideoSink { rec: video.clone() }))
    } else {
        None
    };
    let audio_sink: Option<Box<dyn playcore::AudioSink>> = if with_audio {
        Some(Box::new(RecordingAudioSink { rec: audio.clone() }))
    } else {
        None
    };
    manager
        .open(fake_source(), video_sink, audio_sink)
        .expect("打开合成媒体失败");
    TestPlayer {
        manager,
        events,
        video,
        audio,
    }
}

pub fn wait_for_event(
    events: &Receiver<PlayerEvent>,
    timeout: Duration,
    pred: impl Fn(&PlayerEvent) -> bool,
) -> bool {
    let deadline = Instant::now() + timeout;
    while let Ok(event) = events.recv_deadline(deadline) {
        if pred(&event) {
            return true;
        }
    }
    false
}

pub fn wait_for_completion(events: &Receiver<PlayerEvent>, timeout: Duration) -> bool {
    wait_for_event(events, timeout, |e| {
        matches!(e, PlayerEvent::PlaybackCompleted)
    })
}

/// 轮询直到条件满足或超时
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

use crate::core::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// 流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "视频",
            MediaKind::Audio => "音频",
        }
    }
}

/// 流时间基（每秒单位数的有理数表示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    /// 把流时间基下的时间戳换算为毫秒
    pub fn to_millis(&self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        (ts as f64 * self.num as f64 / self.den as f64 * 1000.0).round() as i64
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

impl PixelFormat {
    /// 一帧图像的数据大小（字节）
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::RGBA => w * h * 4,
            PixelFormat::RGB => w * h * 3,
            PixelFormat::YUV420P | PixelFormat::NV12 => w * h * 3 / 2,
        }
    }
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 流描述 - 容器打开后不可变，格式变化事件发生时整体替换
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub time_base: TimeBase,

    // 视频流专有
    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,
    pub fps: f64,

    // 音频流专有
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: Option<SampleFormat>,
}

impl StreamDescriptor {
    pub fn video(index: usize, codec: &str, width: u32, height: u32, fps: f64) -> Self {
        Self {
            index,
            kind: MediaKind::Video,
            codec: codec.to_string(),
            time_base: TimeBase::MILLIS,
            width,
            height,
            pixel_format: Some(PixelFormat::YUV420P),
            fps,
            sample_rate: 0,
            channels: 0,
            sample_format: None,
        }
    }

    pub fn audio(index: usize, codec: &str, sample_rate: u32, channels: u16) -> Self {
        Self {
            index,
            kind: MediaKind::Audio,
            codec: codec.to_string(),
            time_base: TimeBase::MILLIS,
            width: 0,
            height: 0,
            pixel_format: None,
            fps: 0.0,
            sample_rate,
            channels,
            sample_format: Some(SampleFormat::F32),
        }
    }
}

/// 压缩数据包 - Demuxer 产出，对应解码器消费一次后释放
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub kind: MediaKind,
    pub pts: i64,      // 显示时间戳（毫秒）
    pub dts: i64,      // 解码时间戳（毫秒）
    pub duration: i64, // 时长（毫秒）
    pub keyframe: bool,
    pub discard: bool, // 受损但可恢复的包，作为有损提示提交给解码器
    pub data: Vec<u8>,
}

impl Packet {
    /// 队列预算用的字节权重
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }
}

/// 视频帧数据
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub stream_index: usize,
    pub pts: i64,      // 显示时间戳（毫秒）
    pub duration: i64, // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub stride: usize, // 首平面行跨度（字节），0 表示紧密排布
    pub data: Vec<u8>,
}

/// 音频采样数据（交织排布）
#[derive(Debug, Clone)]
pub enum AudioSamples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl AudioSamples {
    pub fn format(&self) -> SampleFormat {
        match self {
            AudioSamples::F32(_) => SampleFormat::F32,
            AudioSamples::I16(_) => SampleFormat::I16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AudioSamples::F32(v) => v.len(),
            AudioSamples::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 音频帧数据
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub stream_index: usize,
    pub pts: i64,      // 显示时间戳（毫秒）
    pub duration: i64, // 帧持续时间（毫秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: AudioSamples,
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// 解码帧 - 解码器产出，经格式转换后由同步/投递环路消费一次
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self {
            Frame::Video(_) => MediaKind::Video,
            Frame::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn pts(&self) -> i64 {
        match self {
            Frame::Video(f) => f.pts,
            Frame::Audio(f) => f.pts,
        }
    }

    pub fn duration(&self) -> i64 {
        match self {
            Frame::Video(f) => f.duration,
            Frame::Audio(f) => f.duration,
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Opening,
    Ready,
    Playing,
    Paused,
    Seeking,
    Stopped,
    Error,
}

impl PlaybackState {
    /// 终态只接受 stop()/teardown
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Error)
    }
}

/// 媒体信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Option<i64>, // 总时长（毫秒），直播流未知
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration: None,
            width: 0,
            height: 0,
            fps: 0.0,
            video_codec: String::new(),
            audio_codec: String::new(),
            sample_rate: 0,
            channels: 0,
        }
    }
}

/// 播放位置快照
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub position: i64,         // 当前显示时间（毫秒）
    pub duration: Option<i64>, // 总时长（毫秒），未知/直播为 None
    pub video_buffered: i64,   // 视频已缓冲时长（毫秒）
    pub audio_buffered: i64,   // 音频已缓冲时长（毫秒）
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default)]
pub struct BufferStatus {
    /// 视频数据包队列占用（字节）
    pub video_packet_bytes: usize,

    /// 音频数据包队列占用（字节）
    pub audio_packet_bytes: usize,

    /// 视频帧队列已缓冲时长（毫秒）
    pub video_frame_millis: i64,

    /// 音频帧队列已缓冲时长（毫秒）
    pub audio_frame_millis: i64,

    /// 是否正在缓冲
    pub is_buffering: bool,
}

/// 播放器状态信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    pub state: PlaybackState,
    pub position: i64,         // 当前位置（毫秒）
    pub duration: Option<i64>, // 总时长（毫秒）
    pub volume: f32,           // 音量 0.0 - 1.0
    pub media_info: Option<MediaInfo>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            position: 0,
            duration: None,
            volume: 1.0,
            media_info: None,
        }
    }
}

/// 对外事件 - 每条终止路径恰好产生 PlaybackCompleted 或 Error 之一
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChanged(PlaybackState),
    BufferingStarted(MediaKind),
    BufferingEnded(MediaKind),
    PlaybackCompleted,
    Error { kind: ErrorKind, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_base_to_millis() {
        let tb = TimeBase { num: 1, den: 90000 };
        assert_eq!(tb.to_millis(90000), 1000);
        assert_eq!(tb.to_millis(45000), 500);
        let broken = TimeBase { num: 1, den: 0 };
        assert_eq!(broken.to_millis(123), 0);
    }

    #[test]
    fn playback_state_serializes_lowercase() {
        let s = serde_json::to_string(&PlaybackState::Playing).unwrap();
        assert_eq!(s, "\"playing\"");
        let s = serde_json::to_string(&PlaybackState::Seeking).unwrap();
        assert_eq!(s, "\"seeking\"");
    }

    #[test]
    fn frame_size_by_format() {
        assert_eq!(PixelFormat::RGBA.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::YUV420P.frame_size(4, 2), 12);
    }
}

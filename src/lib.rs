//! 播放器内核 - 解码与音视频同步管线
//!
//! 读取多路复用容器、解码音视频、格式转换、按主时钟同步投递，
//! 支持 play/pause/seek/rate 的交互式传输控制。
//! UI、渲染表面、音频设备与网络传输都是外部协作者：
//! 内核只接收可读字节源，向 VideoSink/AudioSink 投递成帧数据。

pub mod core;
pub mod player;

pub use crate::core::{
    AudioFrame, AudioSamples, BufferStatus, ClockAnchor, ErrorKind, Frame, MediaInfo, MediaKind,
    Packet, PipelineConfig, PixelFormat, PlaybackClock, PlaybackPosition, PlaybackState,
    PlayerError, PlayerEvent, PlayerState, Result, SampleFormat, StreamDescriptor, TimeBase,
    VideoFrame,
};
pub use crate::player::{
    AudioLayout, AudioSink, ByteSource, DecodeOutput, Demuxer, DemuxerFactory, DecoderFactory,
    MediaDecoder, PlaybackManager, SubmitStatus, VideoLayout, VideoSink,
};

// 内核基础类型模块

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::PlaybackClock;
pub use config::{ClockAnchor, PipelineConfig};
pub use error::{ErrorKind, PlayerError, Result};
pub use types::{
    AudioFrame, AudioSamples, BufferStatus, Frame, MediaInfo, MediaKind, Packet, PixelFormat,
    PlaybackPosition, PlaybackState, PlayerEvent, PlayerState, SampleFormat, StreamDescriptor,
    TimeBase, VideoFrame,
};

// 播放管线核心模块

pub mod convert;
pub mod decoder;
pub mod demuxer;
pub mod manager;
pub mod queue;
pub mod sink;
pub mod sync;

#[cfg(feature = "audio-device")]
pub mod audio_output;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

pub use convert::{convert_audio, convert_video, AudioLayout, VideoLayout};
pub use decoder::{DecodeOutput, DecoderFactory, MediaDecoder, SubmitStatus};
pub use demuxer::{ByteSource, Demuxer, DemuxerFactory};
pub use manager::{FrameQueue, PacketQueue, PlaybackManager};
pub use queue::{
    MediaQueue, PopError, PopTimeoutError, PushError, TryPopError, TryPushError, Weighted,
};
pub use sink::{AudioSink, VideoSink};
pub use sync::{AudioAlign, PresentGate, SleepOutcome, Synchronizer, VideoAction};

#[cfg(feature = "audio-device")]
pub use audio_output::AudioOutput;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegDecoderFactory, FfmpegDemuxer, FfmpegDemuxerFactory, FilePathSource};

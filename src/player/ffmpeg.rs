//! FFmpeg 适配层 - 把 libav 的句柄式 API 适配到 Demuxer/MediaDecoder 接口
//!
//! 并发与状态机逻辑只依赖 trait，不触碰 FFmpeg 句柄的生命周期。
//! FFmpeg 自己做文件/网络 IO，因此这里需要路径型字节源（path_hint）。

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};

use crate::core::{
    AudioFrame, AudioSamples, Frame, MediaInfo, MediaKind, Packet, PixelFormat, PlayerError,
    Result, StreamDescriptor, TimeBase, VideoFrame,
};
use crate::player::decoder::{DecodeOutput, DecoderFactory, MediaDecoder, SubmitStatus};
use crate::player::demuxer::{ByteSource, Demuxer, DemuxerFactory};

fn stream_millis(tb: ffmpeg::Rational, ts: Option<i64>) -> i64 {
    match ts {
        Some(v) => (v as f64 * tb.numerator() as f64 / tb.denominator() as f64 * 1000.0) as i64,
        None => 0,
    }
}

/// 携带路径的字节源 - FFmpeg 适配器从 path_hint 取出定位符自行打开
pub struct FilePathSource {
    path: String,
}

impl FilePathSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl std::io::Read for FilePathSource {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        // IO 由 FFmpeg 自己完成
        Ok(0)
    }
}

impl ByteSource for FilePathSource {
    fn seek(&mut self, _pos: std::io::SeekFrom) -> std::io::Result<u64> {
        Ok(0)
    }

    fn path_hint(&self) -> Option<&str> {
        Some(&self.path)
    }

    fn description(&self) -> String {
        self.path.clone()
    }
}

/// FFmpeg 解封装器工厂
pub struct FfmpegDemuxerFactory;

impl DemuxerFactory for FfmpegDemuxerFactory {
    fn open(&self, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>> {
        let path = source
            .path_hint()
            .ok_or_else(|| {
                PlayerError::Unrecognized("FFmpeg 适配器需要路径型字节源".to_string())
            })?
            .to_string();
        Ok(Box::new(FfmpegDemuxer::open(&path)?))
    }
}

/// FFmpeg 解封装器
pub struct FfmpegDemuxer {
    input: format::context::Input,
    streams: Vec<StreamDescriptor>,
    media_info: MediaInfo,
    source_path: String,
    video_index: Option<usize>,
    audio_index: Option<usize>,
}

// Input 只在 demux 线程中使用
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    /// 打开媒体文件或流地址
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开媒体源: {}", path);
        ffmpeg::init().map_err(|e| PlayerError::Other(format!("FFmpeg 初始化失败: {}", e)))?;

        let input = format::input(&path.to_string()).map_err(|e| match e {
            ffmpeg::Error::InvalidData => {
                PlayerError::Unrecognized(format!("{}: {}", path, e))
            }
            ffmpeg::Error::Eof => PlayerError::Truncated(format!("{}: {}", path, e)),
            other => PlayerError::Unrecognized(format!("{}: {}", path, other)),
        })?;

        let video_index = input.streams().best(media::Type::Video).map(|s| s.index());
        let audio_index = input.streams().best(media::Type::Audio).map(|s| s.index());
        debug!("视频流索引: {:?}，音频流索引: {:?}", video_index, audio_index);

        let mut streams = Vec::new();
        let mut media_info = MediaInfo::default();

        let duration = input.duration();
        media_info.duration = if duration > 0 {
            Some(duration / 1000) // 微秒转毫秒
        } else {
            None
        };

        if let Some(idx) = video_index {
            let stream = input.stream(idx).ok_or(PlayerError::NoPlayableStream)?;
            let params = stream.parameters();
            let codec_name = params.id().name().to_string();
            let context = codec::context::Context::from_parameters(params)
                .map_err(|e| PlayerError::Truncated(format!("视频流参数损坏: {}", e)))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| PlayerError::Truncated(format!("视频流参数损坏: {}", e)))?;
            let fps_r = stream.avg_frame_rate();
            let fps = if fps_r.denominator() > 0 {
                fps_r.numerator() as f64 / fps_r.denominator() as f64
            } else {
                0.0
            };
            let tb = stream.time_base();
            let mut desc =
                StreamDescriptor::video(idx, &codec_name, decoder.width(), decoder.height(), fps);
            desc.time_base = TimeBase {
                num: tb.numerator() as u32,
                den: tb.denominator() as u32,
            };
            media_info.width = decoder.width();
            media_info.height = decoder.height();
            media_info.fps = fps;
            media_info.video_codec = codec_name;
            streams.push(desc);
        }

        if let Some(idx) = audio_index {
            let stream = input.stream(idx).ok_or(PlayerError::NoPlayableStream)?;
            let params = stream.parameters();
            let codec_name = params.id().name().to_string();
            let context = codec::context::Context::from_parameters(params)
                .map_err(|e| PlayerError::Truncated(format!("音频流参数损坏: {}", e)))?;
            let decoder = context
                .decoder()
                .audio()
                .map_err(|e| PlayerError::Truncated(format!("音频流参数损坏: {}", e)))?;
            let tb = stream.time_base();
            let mut desc =
                StreamDescriptor::audio(idx, &codec_name, decoder.rate(), decoder.channels());
            desc.time_base = TimeBase {
                num: tb.numerator() as u32,
                den: tb.denominator() as u32,
            };
            media_info.sample_rate = decoder.rate();
            media_info.channels = decoder.channels();
            media_info.audio_codec = codec_name;
            streams.push(desc);
        }

        if streams.is_empty() {
            return Err(PlayerError::NoPlayableStream);
        }

        Ok(Self {
            input,
            streams,
            media_info,
            source_path: path.to_string(),
            video_index,
            audio_index,
        })
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn media_info(&self) -> MediaInfo {
        self.media_info.clone()
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    let idx = stream.index();
                    let kind = if Some(idx) == self.video_index {
                        MediaKind::Video
                    } else if Some(idx) == self.audio_index {
                        MediaKind::Audio
                    } else {
                        // 跳过字幕/数据流
                        continue;
                    };
                    let tb = stream.time_base();
                    let corrupt = packet.flags().contains(ffmpeg::packet::Flags::CORRUPT);
                    return Ok(Some(Packet {
                        stream_index: idx,
                        kind,
                        pts: stream_millis(tb, packet.pts()),
                        dts: stream_millis(tb, packet.dts()),
                        duration: stream_millis(tb, Some(packet.duration())),
                        keyframe: packet.is_key(),
                        discard: corrupt,
                        data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                    }));
                }
                None => return Ok(None),
            }
        }
    }

    fn seek(&mut self, target_millis: i64) -> Result<()> {
        let timestamp = target_millis * 1000; // 毫秒转微秒（AV_TIME_BASE）
        self.input
            .seek(timestamp, ..timestamp)
            .map_err(|e| PlayerError::SeekError(e.to_string()))
    }

    fn duration_hint(&self) -> Option<i64> {
        let duration = self.input.duration();
        if duration > 0 {
            Some(duration / 1000)
        } else {
            None
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}

/// FFmpeg 解码器工厂 - 持有各流的编解码参数副本
pub struct FfmpegDecoderFactory {
    params: Vec<(usize, codec::Parameters, f64)>, // (流索引, 参数, 时间基秒)
}

// Parameters 只在创建解码器时读取一次
unsafe impl Send for FfmpegDecoderFactory {}
unsafe impl Sync for FfmpegDecoderFactory {}

impl FfmpegDecoderFactory {
    /// 从已打开的解封装器收集各流参数
    pub fn from_demuxer(demuxer: &FfmpegDemuxer) -> Self {
        let mut params = Vec::new();
        for stream in demuxer.input.streams() {
            let tb = stream.time_base();
            let tb_secs = tb.numerator() as f64 / tb.denominator() as f64;
            params.push((stream.index(), stream.parameters(), tb_secs));
        }
        Self { params }
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn create(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn MediaDecoder>> {
        let (_, params, _) = self
            .params
            .iter()
            .find(|(idx, _, _)| *idx == descriptor.index)
            .ok_or_else(|| {
                PlayerError::Other(format!("流 {} 没有编解码参数", descriptor.index))
            })?;
        let context = codec::context::Context::from_parameters(params.clone())
            .map_err(|e| PlayerError::DecodeFatal(e.to_string()))?;
        match descriptor.kind {
            MediaKind::Video => {
                let decoder = context
                    .decoder()
                    .video()
                    .map_err(|e| PlayerError::DecodeFatal(format!("不支持的视频编码: {}", e)))?;
                Ok(Box::new(FfmpegVideoDecoder {
                    stream_index: descriptor.index,
                    decoder,
                    scaler: None,
                    frame_duration: if descriptor.fps > 0.0 {
                        (1000.0 / descriptor.fps) as i64
                    } else {
                        0
                    },
                }))
            }
            MediaKind::Audio => {
                let decoder = context
                    .decoder()
                    .audio()
                    .map_err(|e| PlayerError::DecodeFatal(format!("不支持的音频编码: {}", e)))?;
                Ok(Box::new(FfmpegAudioDecoder {
                    stream_index: descriptor.index,
                    decoder,
                    resampler: None,
                }))
            }
        }
    }
}

fn map_send_error(e: ffmpeg::Error, packet: Packet) -> Result<SubmitStatus> {
    match e {
        // EAGAIN：内部缓冲满，需要先取帧
        ffmpeg::Error::Other { errno: 11 } => Ok(SubmitStatus::Rejected {
            packet,
            reason: "解码器缓冲已满".to_string(),
        }),
        ffmpeg::Error::InvalidData => Err(PlayerError::DecodeRecoverable(e.to_string())),
        ffmpeg::Error::Eof => Err(PlayerError::DecodeRecoverable(e.to_string())),
        other => Err(PlayerError::DecodeFatal(other.to_string())),
    }
}

fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut pkt = ffmpeg::Packet::copy(&packet.data);
    // 适配层全程使用毫秒时间基，时间戳原样穿透解码器
    pkt.set_pts(Some(packet.pts));
    pkt.set_dts(Some(packet.dts));
    pkt
}

/// FFmpeg 视频解码器（软件解码，输出 RGBA）
pub struct FfmpegVideoDecoder {
    stream_index: usize,
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    frame_duration: i64,
}

// SwsContext 不是 Send，但每个解码器实例只在一个解码线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl MediaDecoder for FfmpegVideoDecoder {
    fn submit(&mut self, packet: Packet) -> Result<SubmitStatus> {
        let pkt = to_ffmpeg_packet(&packet);
        match self.decoder.send_packet(&pkt) {
            Ok(()) => Ok(SubmitStatus::Accepted),
            Err(e) => map_send_error(e, packet),
        }
    }

    fn submit_eof(&mut self) {
        if let Err(e) = self.decoder.send_eof() {
            debug!("视频解码器 send_eof: {}", e);
        }
    }

    fn retrieve(&mut self) -> Result<DecodeOutput> {
        let mut decoded = util::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(DecodeOutput::NeedMoreInput),
            Err(ffmpeg::Error::Eof) => return Ok(DecodeOutput::EndOfStream),
            Err(e) => return Err(PlayerError::DecodeRecoverable(e.to_string())),
        }

        let width = decoded.width();
        let height = decoded.height();

        // YUV -> RGBA
        if self.scaler.is_none() {
            self.scaler = Some(
                software::scaling::Context::get(
                    decoded.format(),
                    width,
                    height,
                    util::format::Pixel::RGBA,
                    width,
                    height,
                    software::scaling::Flags::BILINEAR,
                )
                .map_err(|e| PlayerError::Conversion(e.to_string()))?,
            );
        }
        let mut rgba = util::frame::Video::empty();
        self.scaler
            .as_mut()
            .unwrap()
            .run(&decoded, &mut rgba)
            .map_err(|e| PlayerError::Conversion(e.to_string()))?;

        // 去掉行对齐，拷贝为紧密排布
        let stride = rgba.stride(0);
        let row = width as usize * 4;
        let mut data = vec![0u8; row * height as usize];
        let src = rgba.data(0);
        for y in 0..height as usize {
            data[y * row..(y + 1) * row].copy_from_slice(&src[y * stride..y * stride + row]);
        }

        Ok(DecodeOutput::Frame(Frame::Video(VideoFrame {
            stream_index: self.stream_index,
            pts: decoded.timestamp().unwrap_or(0),
            duration: self.frame_duration,
            width,
            height,
            format: PixelFormat::RGBA,
            stride: 0,
            data,
        })))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn info(&self) -> String {
        "FFmpeg 软件视频解码".to_string()
    }
}

/// FFmpeg 音频解码器（输出交织 f32，保持源采样率/声道）
pub struct FfmpegAudioDecoder {
    stream_index: usize,
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
}

// SwrContext 不是 Send，但每个解码器实例只在一个解码线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl MediaDecoder for FfmpegAudioDecoder {
    fn submit(&mut self, packet: Packet) -> Result<SubmitStatus> {
        let pkt = to_ffmpeg_packet(&packet);
        match self.decoder.send_packet(&pkt) {
            Ok(()) => Ok(SubmitStatus::Accepted),
            Err(e) => map_send_error(e, packet),
        }
    }

    fn submit_eof(&mut self) {
        if let Err(e) = self.decoder.send_eof() {
            debug!("音频解码器 send_eof: {}", e);
        }
    }

    fn retrieve(&mut self) -> Result<DecodeOutput> {
        let mut decoded = util::frame::Audio::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(DecodeOutput::NeedMoreInput),
            Err(ffmpeg::Error::Eof) => return Ok(DecodeOutput::EndOfStream),
            Err(e) => return Err(PlayerError::DecodeRecoverable(e.to_string())),
        }

        let rate = decoded.rate();
        let channels = decoded.channels();

        // 统一到交织 f32，重采样/混音交给格式转换阶段
        if self.resampler.is_none() {
            self.resampler = Some(
                software::resampling::Context::get(
                    decoded.format(),
                    decoded.channel_layout(),
                    rate,
                    util::format::Sample::F32(util::format::sample::Type::Packed),
                    decoded.channel_layout(),
                    rate,
                )
                .map_err(|e| PlayerError::Conversion(e.to_string()))?,
            );
        }
        let mut converted = util::frame::Audio::empty();
        self.resampler
            .as_mut()
            .unwrap()
            .run(&decoded, &mut converted)
            .map_err(|e| PlayerError::Conversion(e.to_string()))?;

        let sample_count = converted.samples() * channels as usize;
        let plane = converted.plane::<f32>(0);
        let samples: Vec<f32> = plane.iter().take(sample_count).copied().collect();
        if samples.len() < sample_count {
            warn!("音频平面数据不足: {} < {}", samples.len(), sample_count);
        }

        let duration = if rate > 0 {
            (converted.samples() as i64 * 1000) / rate as i64
        } else {
            0
        };

        Ok(DecodeOutput::Frame(Frame::Audio(AudioFrame {
            stream_index: self.stream_index,
            pts: decoded.timestamp().unwrap_or(0),
            duration,
            sample_rate: rate,
            channels,
            samples: AudioSamples::F32(samples),
        })))
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn info(&self) -> String {
        "FFmpeg 音频解码".to_string()
    }
}

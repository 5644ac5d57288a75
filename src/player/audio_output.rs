//! cpal 音频输出 - AudioSink 适配器
//!
//! sink 自身是节拍源：回调线程消费采样的计数折算成已播出位置，
//! 经 played_position 反馈给主时钟。

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::{AudioFrame, AudioSamples, PlayerError, Result};
use crate::player::convert::AudioLayout;
use crate::player::sink::AudioSink;

/// 音频输出 - 使用 cpal 播放音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
    consumed: Arc<AtomicU64>, // 回调线程已消费的采样数（交织计）
    base_pts: Option<i64>,    // 首帧 PTS，折算播出位置的起点
}

// cpal::Stream 不是 Send，但 sink 只在音频投递线程中使用
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 创建音频输出（不支持的配置自动回退到标准配置）
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let mut config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        if !Self::supports(&device, &config)? {
            warn!(
                "⚠ 音频设备不支持 {} Hz, {} 声道，回退到标准配置",
                sample_rate, channels
            );
            let fallbacks = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
            let mut found = false;
            for (rate, ch) in fallbacks {
                let candidate = StreamConfig {
                    channels: ch,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                };
                if Self::supports(&device, &candidate)? {
                    info!("✅ 使用回退配置: {} Hz, {} 声道", rate, ch);
                    config = candidate;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置（原请求: {} Hz, {} 声道）",
                    sample_rate, channels
                )));
            }
        }

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
            consumed: Arc::new(AtomicU64::new(0)),
            base_pts: None,
        })
    }

    fn supports(device: &Device, config: &StreamConfig) -> Result<bool> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported.into_iter().any(|s| Self::compatible(config, &s)))
    }

    fn compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0
            && config.channels == supported.channels()
    }

    /// 启动输出流
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();
        let consumed = self.consumed.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    let mut played = 0u64;
                    for sample in data.iter_mut() {
                        if let Some(value) = buffer.pop() {
                            *sample = value * vol;
                            played += 1;
                        } else {
                            *sample = 0.0;
                        }
                    }
                    consumed.fetch_add(played, Ordering::Relaxed);
                },
                move |err| {
                    warn!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
        self.stream = Some(stream);
        info!("音频输出已启动: {:?}", self.config);
        Ok(())
    }

    /// 停止输出流
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    /// 缓冲中尚未播出的采样数
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    /// 清空未播出的缓冲（seek/停止时使用）
    pub fn clear(&mut self) {
        while self.buffer.pop().is_some() {}
        self.base_pts = None;
        self.consumed.store(0, Ordering::Relaxed);
    }
}

impl AudioSink for AudioOutput {
    fn enqueue(&mut self, frame: &AudioFrame) -> Result<()> {
        if self.stream.is_none() {
            self.start()?;
        }
        if self.base_pts.is_none() {
            self.base_pts = Some(frame.pts);
            self.consumed.store(0, Ordering::Relaxed);
        }
        match &frame.samples {
            AudioSamples::F32(samples) => {
                for &s in samples {
                    self.buffer.push(s);
                }
                Ok(())
            }
            AudioSamples::I16(_) => Err(PlayerError::AudioError(
                "cpal 输出只接受 f32 采样".to_string(),
            )),
        }
    }

    fn played_position(&self) -> Option<i64> {
        let base = self.base_pts?;
        let consumed = self.consumed.load(Ordering::Relaxed);
        let per_channel = consumed / self.config.channels.max(1) as u64;
        Some(base + (per_channel * 1000 / self.config.sample_rate.0.max(1) as u64) as i64)
    }

    fn preferred_layout(&self) -> AudioLayout {
        AudioLayout {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
            format: crate::core::SampleFormat::F32,
        }
    }

    fn set_volume(&mut self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

use crate::core::{
    AudioFrame, AudioSamples, PixelFormat, PlayerError, Result, SampleFormat, VideoFrame,
};

/// 渲染端期望的像素布局
///
/// width/height 为 0 表示保持源分辨率。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl VideoLayout {
    pub fn rgba() -> Self {
        Self {
            format: PixelFormat::RGBA,
            width: 0,
            height: 0,
        }
    }
}

/// 音频 sink 期望的采样布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLayout {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioLayout {
    pub fn stereo_f32(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 2,
            format: SampleFormat::F32,
        }
    }
}

/// 格式转换 - 纯函数、无状态、同步
///
/// 唯一允许的失败是源/目标组合不支持，对该流视为致命错误。
pub fn convert_video(frame: &VideoFrame, target: &VideoLayout) -> Result<VideoFrame> {
    if target.format != PixelFormat::RGBA {
        return Err(PlayerError::Conversion(format!(
            "不支持的目标像素格式: {:?}",
            target.format
        )));
    }

    let rgba = match frame.format {
        PixelFormat::RGBA => repack_rgba(frame),
        PixelFormat::RGB => rgb_to_rgba(frame),
        PixelFormat::YUV420P => yuv420p_to_rgba(frame)?,
        PixelFormat::NV12 => nv12_to_rgba(frame)?,
    };

    let (tw, th) = (
        if target.width == 0 { rgba.width } else { target.width },
        if target.height == 0 { rgba.height } else { target.height },
    );
    if tw == rgba.width && th == rgba.height {
        return Ok(rgba);
    }
    Ok(scale_rgba(&rgba, tw, th))
}

pub fn convert_audio(frame: &AudioFrame, target: &AudioLayout) -> Result<AudioFrame> {
    if target.format != SampleFormat::F32 {
        return Err(PlayerError::Conversion(format!(
            "不支持的目标采样格式: {:?}",
            target.format
        )));
    }
    if frame.channels == 0 || target.channels == 0 {
        return Err(PlayerError::Conversion("声道数为 0".to_string()));
    }

    // 统一到 f32 交织
    let f32_samples: Vec<f32> = match &frame.samples {
        AudioSamples::F32(v) => v.clone(),
        AudioSamples::I16(v) => v.iter().map(|&s| s as f32 / 32768.0).collect(),
    };

    let mixed = remix_channels(&f32_samples, frame.channels, target.channels)?;

    let resampled = if frame.sample_rate != target.sample_rate {
        if frame.sample_rate == 0 || target.sample_rate == 0 {
            return Err(PlayerError::Conversion("采样率为 0".to_string()));
        }
        resample_linear(&mixed, target.channels, frame.sample_rate, target.sample_rate)
    } else {
        mixed
    };

    Ok(AudioFrame {
        stream_index: frame.stream_index,
        pts: frame.pts,
        duration: frame.duration,
        sample_rate: target.sample_rate,
        channels: target.channels,
        samples: AudioSamples::F32(resampled),
    })
}

// ==================== 视频 ====================

fn row_stride(frame: &VideoFrame, bytes_per_pixel: usize) -> usize {
    if frame.stride == 0 {
        frame.width as usize * bytes_per_pixel
    } else {
        frame.stride
    }
}

/// 去掉行对齐填充，输出紧密排布的 RGBA
fn repack_rgba(frame: &VideoFrame) -> VideoFrame {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let stride = row_stride(frame, 4);
    let row = w * 4;
    if stride == row {
        let mut out = frame.clone();
        out.stride = 0;
        return out;
    }

    let mut data = vec![0u8; row * h];
    for y in 0..h {
        let src = y * stride;
        let dst = y * row;
        data[dst..dst + row].copy_from_slice(&frame.data[src..src + row]);
    }
    VideoFrame {
        data,
        stride: 0,
        format: PixelFormat::RGBA,
        ..frame.clone()
    }
}

fn rgb_to_rgba(frame: &VideoFrame) -> VideoFrame {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let stride = row_stride(frame, 3);
    let mut data = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        let row = &frame.data[y * stride..y * stride + w * 3];
        for px in row.chunks_exact(3) {
            data.extend_from_slice(&[px[0], px[1], px[2], 255]);
        }
    }
    VideoFrame {
        data,
        stride: 0,
        format: PixelFormat::RGBA,
        ..frame.clone()
    }
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 整数近似: 视频范围 Y [16,235]、UV [16,240]
#[inline]
fn yuv_to_rgba_px(y: u8, u: u8, v: u8, out: &mut [u8]) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    out[0] = clamp_u8((298 * c + 409 * e + 128) >> 8);
    out[1] = clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8);
    out[2] = clamp_u8((298 * c + 516 * d + 128) >> 8);
    out[3] = 255;
}

fn yuv420p_to_rgba(frame: &VideoFrame) -> Result<VideoFrame> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let y_stride = row_stride(frame, 1);
    let c_stride = y_stride.div_ceil(2);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    let y_size = y_stride * h;
    let c_size = c_stride * ch;
    if frame.data.len() < y_size + 2 * c_size {
        return Err(PlayerError::Conversion(format!(
            "YUV420P 数据不足: {} < {}",
            frame.data.len(),
            y_size + 2 * c_size
        )));
    }
    let (y_plane, rest) = frame.data.split_at(y_size);
    let (u_plane, v_plane) = rest.split_at(c_size);

    let mut data = vec![0u8; w * h * 4];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * y_stride + col];
            let u = u_plane[(row / 2) * c_stride + (col / 2).min(cw - 1)];
            let v = v_plane[(row / 2) * c_stride + (col / 2).min(cw - 1)];
            let o = (row * w + col) * 4;
            yuv_to_rgba_px(y, u, v, &mut data[o..o + 4]);
        }
    }
    Ok(VideoFrame {
        data,
        stride: 0,
        format: PixelFormat::RGBA,
        ..frame.clone()
    })
}

fn nv12_to_rgba(frame: &VideoFrame) -> Result<VideoFrame> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let y_stride = row_stride(frame, 1);
    let ch = h.div_ceil(2);

    let y_size = y_stride * h;
    let uv_size = y_stride * ch;
    if frame.data.len() < y_size + uv_size {
        return Err(PlayerError::Conversion(format!(
            "NV12 数据不足: {} < {}",
            frame.data.len(),
            y_size + uv_size
        )));
    }
    let (y_plane, uv_plane) = frame.data.split_at(y_size);

    let mut data = vec![0u8; w * h * 4];
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * y_stride + col];
            let uv_off = (row / 2) * y_stride + (col / 2) * 2;
            let u = uv_plane[uv_off];
            let v = uv_plane[uv_off + 1];
            let o = (row * w + col) * 4;
            yuv_to_rgba_px(y, u, v, &mut data[o..o + 4]);
        }
    }
    Ok(VideoFrame {
        data,
        stride: 0,
        format: PixelFormat::RGBA,
        ..frame.clone()
    })
}

/// 最近邻缩放（渲染端要求固定分辨率时使用）
fn scale_rgba(frame: &VideoFrame, tw: u32, th: u32) -> VideoFrame {
    let (sw, sh) = (frame.width as usize, frame.height as usize);
    let (tw_u, th_u) = (tw as usize, th as usize);
    let mut data = vec![0u8; tw_u * th_u * 4];
    for row in 0..th_u {
        let sy = row * sh / th_u;
        for col in 0..tw_u {
            let sx = col * sw / tw_u;
            let src = (sy * sw + sx) * 4;
            let dst = (row * tw_u + col) * 4;
            data[dst..dst + 4].copy_from_slice(&frame.data[src..src + 4]);
        }
    }
    VideoFrame {
        data,
        stride: 0,
        width: tw,
        height: th,
        format: PixelFormat::RGBA,
        ..frame.clone()
    }
}

// ==================== 音频 ====================

fn remix_channels(samples: &[f32], src: u16, dst: u16) -> Result<Vec<f32>> {
    if src == dst {
        return Ok(samples.to_vec());
    }
    let src_n = src as usize;
    let dst_n = dst as usize;
    let frames = samples.len() / src_n;

    // 单声道复制到所有目标声道
    if src == 1 {
        let mut out = Vec::with_capacity(frames * dst_n);
        for &s in samples.iter().take(frames) {
            for _ in 0..dst_n {
                out.push(s);
            }
        }
        return Ok(out);
    }
    // 任意声道下混为单声道：取平均
    if dst == 1 {
        let mut out = Vec::with_capacity(frames);
        for chunk in samples.chunks_exact(src_n) {
            out.push(chunk.iter().sum::<f32>() / src_n as f32);
        }
        return Ok(out);
    }
    // 多声道降为立体声：取前两个声道
    if dst == 2 && src > 2 {
        let mut out = Vec::with_capacity(frames * 2);
        for chunk in samples.chunks_exact(src_n) {
            out.push(chunk[0]);
            out.push(chunk[1]);
        }
        return Ok(out);
    }

    Err(PlayerError::Conversion(format!(
        "不支持的声道转换: {} -> {}",
        src, dst
    )))
}

/// 线性插值重采样（交织 f32）
fn resample_linear(samples: &[f32], channels: u16, src_rate: u32, dst_rate: u32) -> Vec<f32> {
    let ch = channels as usize;
    let in_frames = samples.len() / ch;
    if in_frames == 0 {
        return Vec::new();
    }
    let out_frames = (in_frames as u64 * dst_rate as u64 / src_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_frames * ch);
    for i in 0..out_frames {
        let pos = i as f64 * src_rate as f64 / dst_rate as f64;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let next = (idx + 1).min(in_frames - 1);
        for c in 0..ch {
            let a = samples[idx * ch + c];
            let b = samples[next * ch + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_frame(format: PixelFormat, w: u32, h: u32, data: Vec<u8>) -> VideoFrame {
        VideoFrame {
            stream_index: 0,
            pts: 0,
            duration: 40,
            width: w,
            height: h,
            format,
            stride: 0,
            data,
        }
    }

    #[test]
    fn yuv420p_black_and_white() {
        // 2x2 全白 (Y=235, U=V=128)，再全黑 (Y=16)
        let white = video_frame(
            PixelFormat::YUV420P,
            2,
            2,
            vec![235, 235, 235, 235, 128, 128],
        );
        let out = convert_video(&white, &VideoLayout::rgba()).unwrap();
        assert_eq!(out.format, PixelFormat::RGBA);
        assert!(out.data[0] >= 254 && out.data[1] >= 254 && out.data[2] >= 254);
        assert_eq!(out.data[3], 255);

        let black = video_frame(PixelFormat::YUV420P, 2, 2, vec![16, 16, 16, 16, 128, 128]);
        let out = convert_video(&black, &VideoLayout::rgba()).unwrap();
        assert!(out.data[0] <= 1 && out.data[1] <= 1 && out.data[2] <= 1);
    }

    #[test]
    fn yuv420p_truncated_data_is_conversion_error() {
        let bad = video_frame(PixelFormat::YUV420P, 4, 4, vec![0; 8]);
        match convert_video(&bad, &VideoLayout::rgba()) {
            Err(PlayerError::Conversion(_)) => {}
            other => panic!("应报转换错误，得到 {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rgb_gains_opaque_alpha() {
        let f = video_frame(PixelFormat::RGB, 2, 1, vec![10, 20, 30, 40, 50, 60]);
        let out = convert_video(&f, &VideoLayout::rgba()).unwrap();
        assert_eq!(out.data, vec![10, 20, 30, 255, 40, 50, 60, 255]);
    }

    #[test]
    fn rgba_stride_padding_removed() {
        // 每行 1 像素 + 4 字节填充
        let mut f = video_frame(PixelFormat::RGBA, 1, 2, vec![1, 2, 3, 4, 0, 0, 0, 0, 5, 6, 7, 8, 0, 0, 0, 0]);
        f.stride = 8;
        let out = convert_video(&f, &VideoLayout::rgba()).unwrap();
        assert_eq!(out.stride, 0);
        assert_eq!(out.data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn nearest_neighbor_scale() {
        let f = video_frame(PixelFormat::RGBA, 1, 1, vec![9, 9, 9, 255]);
        let target = VideoLayout {
            format: PixelFormat::RGBA,
            width: 2,
            height: 2,
        };
        let out = convert_video(&f, &target).unwrap();
        assert_eq!(out.width, 2);
        assert_eq!(out.data.len(), 16);
        assert_eq!(&out.data[12..16], &[9, 9, 9, 255]);
    }

    fn audio_frame(rate: u32, channels: u16, samples: AudioSamples) -> AudioFrame {
        AudioFrame {
            stream_index: 1,
            pts: 0,
            duration: 20,
            sample_rate: rate,
            channels,
            samples,
        }
    }

    #[test]
    fn i16_to_f32_scaling() {
        let f = audio_frame(48000, 1, AudioSamples::I16(vec![0, 16384, -32768]));
        let target = AudioLayout {
            sample_rate: 48000,
            channels: 1,
            format: SampleFormat::F32,
        };
        let out = convert_audio(&f, &target).unwrap();
        match out.samples {
            AudioSamples::F32(v) => {
                assert_eq!(v[0], 0.0);
                assert!((v[1] - 0.5).abs() < 1e-4);
                assert!((v[2] + 1.0).abs() < 1e-4);
            }
            _ => panic!("应输出 f32"),
        }
    }

    #[test]
    fn mono_upmixes_to_stereo() {
        let f = audio_frame(48000, 1, AudioSamples::F32(vec![0.25, -0.5]));
        let out = convert_audio(&f, &AudioLayout::stereo_f32(48000)).unwrap();
        match out.samples {
            AudioSamples::F32(v) => assert_eq!(v, vec![0.25, 0.25, -0.5, -0.5]),
            _ => panic!(),
        }
        assert_eq!(out.channels, 2);
    }

    #[test]
    fn stereo_downmixes_to_mono_by_average() {
        let f = audio_frame(48000, 2, AudioSamples::F32(vec![1.0, 0.0, -1.0, -1.0]));
        let target = AudioLayout {
            sample_rate: 48000,
            channels: 1,
            format: SampleFormat::F32,
        };
        let out = convert_audio(&f, &target).unwrap();
        match out.samples {
            AudioSamples::F32(v) => assert_eq!(v, vec![0.5, -1.0]),
            _ => panic!(),
        }
    }

    #[test]
    fn resample_halves_frame_count() {
        let f = audio_frame(48000, 1, AudioSamples::F32(vec![0.0; 480]));
        let target = AudioLayout {
            sample_rate: 24000,
            channels: 1,
            format: SampleFormat::F32,
        };
        let out = convert_audio(&f, &target).unwrap();
        assert_eq!(out.samples.len(), 240);
        assert_eq!(out.sample_rate, 24000);
    }

    #[test]
    fn unsupported_channel_combo_is_error() {
        let f = audio_frame(48000, 2, AudioSamples::F32(vec![0.0; 8]));
        let target = AudioLayout {
            sample_rate: 48000,
            channels: 6,
            format: SampleFormat::F32,
        };
        assert!(convert_audio(&f, &target).is_err());
    }
}

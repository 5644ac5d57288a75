use crate::core::{AudioFrame, Result, VideoFrame};
use crate::player::convert::{AudioLayout, VideoLayout};

/// 视频呈现 sink（外部协作者）
///
/// present 运行在投递环路上，每显示帧至多调用一次，必须快速返回（非阻塞契约）。
pub trait VideoSink: Send {
    fn present(&mut self, frame: &VideoFrame);

    /// 期望的像素布局（格式转换阶段的目标）
    fn preferred_layout(&self) -> VideoLayout {
        VideoLayout::rgba()
    }
}

/// 音频输出 sink（外部协作者）
///
/// sink 自身是节拍源：它消费采样的速度决定播放节奏，
/// played_position 反馈回来校准主时钟。
pub trait AudioSink: Send {
    /// 送入一段采样缓冲
    fn enqueue(&mut self, frame: &AudioFrame) -> Result<()>;

    /// sink 已播出的位置（毫秒）；不可用返回 None，时钟按首帧锚定自走
    fn played_position(&self) -> Option<i64> {
        None
    }

    /// 期望的采样布局（格式转换阶段的目标）
    fn preferred_layout(&self) -> AudioLayout {
        AudioLayout::stereo_f32(48000)
    }

    fn set_volume(&mut self, _volume: f32) {}
}

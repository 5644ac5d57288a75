use serde::{Deserialize, Serialize};

/// 纯视频流的时钟锚定策略
///
/// 默认锚定在首帧到达时刻，避免把解码启动耗时算进播放时间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockAnchor {
    FirstFrame,
    DecodeStart,
}

/// 管线配置
///
/// 队列上限一律按字节/时长预算表达，不按包个数 - 压缩包大小差异太大。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 视频包队列预算（字节）
    pub video_packet_budget_bytes: usize,

    /// 音频包队列预算（字节）
    pub audio_packet_budget_bytes: usize,

    /// 视频帧队列预算（毫秒）
    pub video_frame_budget_millis: i64,

    /// 音频帧队列预算（毫秒）
    pub audio_frame_budget_millis: i64,

    /// 视频呈现同步阈值（毫秒）：|delta| 小于该值视为准点，立即呈现
    pub sync_threshold_millis: i64,

    /// 视频丢帧阈值（毫秒）：落后超过该值的帧直接丢弃，不呈现
    pub drop_threshold_millis: i64,

    /// 时钟重同步阈值（毫秒）：音频漂移超过该值时校正时钟
    pub resync_threshold_millis: i64,

    /// 音频允许领先时钟送入 sink 的量（毫秒）
    pub audio_lead_millis: i64,

    /// 连续损坏包的最大跳过次数，超过则升级为不可恢复解封装错误
    pub max_corrupt_skips: u32,

    /// 字节源 IO 错误的最大重试次数
    pub io_retry_max: u32,

    /// IO 重试的基础退避（毫秒，按次数翻倍）
    pub io_retry_backoff_millis: u64,

    /// 帧队列空转多久视为缓冲中（毫秒）
    pub underrun_grace_millis: u64,

    /// 纯视频流时钟锚定策略
    pub video_only_anchor: ClockAnchor,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // 约 6-12 秒本地文件压缩数据
            video_packet_budget_bytes: 8 * 1024 * 1024,
            audio_packet_budget_bytes: 2 * 1024 * 1024,
            // 约 1 秒解码帧
            video_frame_budget_millis: 1000,
            audio_frame_budget_millis: 500,
            sync_threshold_millis: 10,
            drop_threshold_millis: 100,
            resync_threshold_millis: 40,
            audio_lead_millis: 200,
            max_corrupt_skips: 8,
            io_retry_max: 3,
            io_retry_backoff_millis: 50,
            underrun_grace_millis: 200,
            video_only_anchor: ClockAnchor::FirstFrame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets_are_positive() {
        let cfg = PipelineConfig::default();
        assert!(cfg.video_packet_budget_bytes > 0);
        assert!(cfg.video_frame_budget_millis > 0);
        assert!(cfg.drop_threshold_millis > cfg.sync_threshold_millis);
    }

    #[test]
    fn config_round_trips_through_serde() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video_only_anchor, ClockAnchor::FirstFrame);
        assert_eq!(back.max_corrupt_skips, cfg.max_corrupt_skips);
    }
}

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use crate::core::{PipelineConfig, PlaybackClock};

/// 视频帧的呈现决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoAction {
    /// 准点或轻微落后，立即呈现
    PresentNow,
    /// 提前到达，等待后呈现（墙钟时长，已按播放速率折算）
    PresentAfter(Duration),
    /// 落后超过丢帧阈值，直接丢弃 - 宁可丢过期视频也不拖住播放
    Drop { behind_millis: i64 },
}

/// 音频帧的对齐决策 - 音频永不丢弃，只校正时钟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAlign {
    /// 直接送入 sink
    Enqueue,
    /// 漂移超阈值，时钟已被校正到该帧 PTS
    ClockCorrected { drift_millis: i64 },
}

/// 同步器 - 计算每帧相对主时钟应等待还是丢弃
pub struct Synchronizer {
    clock: PlaybackClock,
    sync_threshold: i64,
    drop_threshold: i64,
    resync_threshold: i64,
    audio_lead: i64,
}

impl Synchronizer {
    pub fn new(clock: PlaybackClock, config: &PipelineConfig) -> Self {
        Self {
            clock,
            sync_threshold: config.sync_threshold_millis,
            drop_threshold: config.drop_threshold_millis,
            resync_threshold: config.resync_threshold_millis,
            audio_lead: config.audio_lead_millis,
        }
    }

    /// 视频帧调度：delta = pts - clock.now()
    pub fn schedule_video(&self, pts: i64) -> VideoAction {
        let delta = pts - self.clock.now();
        if delta > self.sync_threshold {
            let wall = (delta as f64 / self.clock.rate()).max(0.0);
            VideoAction::PresentAfter(Duration::from_millis(wall as u64))
        } else if delta >= -self.drop_threshold {
            VideoAction::PresentNow
        } else {
            VideoAction::Drop {
                behind_millis: -delta,
            }
        }
    }

    /// 视频侧漂移（每次呈现决策后重算，供诊断日志）
    pub fn video_drift(&self, pts: i64) -> i64 {
        pts - self.clock.now()
    }

    /// 是否达到时钟重同步阈值
    pub fn needs_resync(&self, drift_millis: i64) -> bool {
        drift_millis.abs() > self.resync_threshold
    }

    /// 音频帧送入 sink 前允许领先的量；返回需要等待的墙钟时长
    pub fn audio_pacing_wait(&self, pts: i64) -> Option<Duration> {
        let lead = pts - self.clock.now() - self.audio_lead;
        if lead > 0 {
            let wall = lead as f64 / self.clock.rate();
            Some(Duration::from_millis(wall as u64))
        } else {
            None
        }
    }

    /// 音频位置反馈：sink 已播出位置与时钟漂移超阈值时校正时钟
    /// （音频是主时钟的唯一校准者）
    pub fn align_audio(&self, position: i64) -> AudioAlign {
        let drift = position - self.clock.now();
        if drift.abs() > self.resync_threshold {
            let applied = self.clock.correct_to(position);
            AudioAlign::ClockCorrected {
                drift_millis: applied,
            }
        } else {
            AudioAlign::Enqueue
        }
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }
}

/// 定时等待的结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// 等满时长，可以呈现
    Completed,
    /// 被 pause/seek 打断，调用方应重新评估手头的帧
    Interrupted,
    /// 会话取消（stop/teardown）
    Cancelled,
}

struct GateState {
    paused: bool,
    cancelled: bool,
    epoch: u64,
}

/// 投递门闩 - 同步等待的可取消挂起点
///
/// 投递环路的所有定时等待都经过这里，pause/seek/stop 立即唤醒，
/// 保证传输控制的响应延迟有界。
pub struct PresentGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl PresentGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                paused: false,
                cancelled: false,
                epoch: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn pause(&self) {
        let mut st = self.state.lock();
        st.paused = true;
        st.epoch += 1;
        self.cond.notify_all();
    }

    pub fn resume(&self) {
        let mut st = self.state.lock();
        st.paused = false;
        st.epoch += 1;
        self.cond.notify_all();
    }

    /// 打断当前所有定时等待但不改暂停状态（seek 使用）
    pub fn interrupt(&self) {
        let mut st = self.state.lock();
        st.epoch += 1;
        self.cond.notify_all();
    }

    /// 会话终止，之后一切等待立即返回 Cancelled
    pub fn cancel(&self) {
        let mut st = self.state.lock();
        st.cancelled = true;
        st.epoch += 1;
        self.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// 暂停期间挂起；恢复返回 true，取消返回 false
    pub fn wait_while_paused(&self) -> bool {
        let mut st = self.state.lock();
        loop {
            if st.cancelled {
                return false;
            }
            if !st.paused {
                return true;
            }
            self.cond.wait(&mut st);
        }
    }

    /// 可取消的定时等待
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        let mut st = self.state.lock();
        if st.cancelled {
            return SleepOutcome::Cancelled;
        }
        let entry_epoch = st.epoch;
        let outcome = self.cond.wait_for(&mut st, duration);
        if st.cancelled {
            SleepOutcome::Cancelled
        } else if st.epoch != entry_epoch {
            SleepOutcome::Interrupted
        } else if outcome.timed_out() {
            SleepOutcome::Completed
        } else {
            // 虚假唤醒按打断处理，调用方会重新评估
            SleepOutcome::Interrupted
        }
    }
}

impl Default for PresentGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn synchronizer() -> Synchronizer {
        let clock = PlaybackClock::new();
        clock.set_time(1000);
        Synchronizer::new(clock, &PipelineConfig::default())
    }

    #[test]
    fn early_frame_waits() {
        let sync = synchronizer();
        match sync.schedule_video(1100) {
            VideoAction::PresentAfter(d) => {
                assert!(d >= Duration::from_millis(90) && d <= Duration::from_millis(110));
            }
            other => panic!("应等待呈现，得到 {:?}", other),
        }
    }

    #[test]
    fn on_time_frame_presents_now() {
        let sync = synchronizer();
        assert_eq!(sync.schedule_video(1005), VideoAction::PresentNow);
        assert_eq!(sync.schedule_video(995), VideoAction::PresentNow);
    }

    #[test]
    fn stale_frame_dropped() {
        let sync = synchronizer();
        match sync.schedule_video(700) {
            VideoAction::Drop { behind_millis } => assert_eq!(behind_millis, 300),
            other => panic!("应丢帧，得到 {:?}", other),
        }
    }

    #[test]
    fn rate_scales_wait() {
        let clock = PlaybackClock::new();
        clock.set_time(0);
        clock.set_rate(2.0);
        let sync = Synchronizer::new(clock, &PipelineConfig::default());
        match sync.schedule_video(200) {
            VideoAction::PresentAfter(d) => {
                assert!(d >= Duration::from_millis(90) && d <= Duration::from_millis(110));
            }
            other => panic!("应等待呈现，得到 {:?}", other),
        }
    }

    #[test]
    fn audio_small_drift_enqueues() {
        let sync = synchronizer();
        assert_eq!(sync.align_audio(1020), AudioAlign::Enqueue);
        assert_eq!(sync.clock().now(), 1000);
    }

    #[test]
    fn audio_large_drift_corrects_clock() {
        let sync = synchronizer();
        match sync.align_audio(1500) {
            AudioAlign::ClockCorrected { drift_millis } => assert_eq!(drift_millis, 500),
            other => panic!("应校正时钟，得到 {:?}", other),
        }
        assert_eq!(sync.clock().now(), 1500);
    }

    #[test]
    fn gate_sleep_interrupted_promptly() {
        let gate = Arc::new(PresentGate::new());
        let g = gate.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let outcome = g.sleep(Duration::from_secs(5));
            (outcome, start.elapsed())
        });
        thread::sleep(Duration::from_millis(30));
        gate.interrupt();
        let (outcome, waited) = handle.join().unwrap();
        assert_eq!(outcome, SleepOutcome::Interrupted);
        assert!(waited < Duration::from_millis(500));
    }

    #[test]
    fn gate_cancel_wins_over_pause() {
        let gate = Arc::new(PresentGate::new());
        gate.pause();
        let g = gate.clone();
        let handle = thread::spawn(move || g.wait_while_paused());
        thread::sleep(Duration::from_millis(20));
        gate.cancel();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn gate_sleep_completes_without_interference() {
        let gate = PresentGate::new();
        assert_eq!(
            gate.sleep(Duration::from_millis(10)),
            SleepOutcome::Completed
        );
    }
}

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 音视频同步的主时间源
///
/// 有音频流时由音频投递环路作为唯一写者校准（音频主时钟策略），
/// 纯视频流则在第一帧到达时锚定后自走。其余组件只读。
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_pts: i64,         // 基准 PTS（毫秒）
    base_instant: Instant, // 基准时刻
    playback_rate: f64,    // 播放速率（1.0 = 正常）
    paused: bool,
    paused_at: i64, // 暂停时的位置
    anchored: bool, // 是否已被首帧/音频锚定
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: 0,
                base_instant: Instant::now(),
                playback_rate: 1.0,
                paused: true,
                paused_at: 0,
                anchored: false,
            })),
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        let inner = self.inner.lock();
        Self::now_unlocked(&inner)
    }

    /// 设置播放位置（seek / 停止复位使用）
    pub fn set_time(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
        inner.anchored = false;
    }

    /// 首帧锚定：仅在尚未锚定时生效，返回是否真正执行
    pub fn anchor(&self, pts: i64) -> bool {
        let mut inner = self.inner.lock();
        if inner.anchored {
            return false;
        }
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
        inner.anchored = true;
        true
    }

    /// 重同步：把时钟校正到给定 PTS，返回校正前的漂移（毫秒）
    ///
    /// 漂移 = pts - now()。音频投递环路在漂移超阈值时调用。
    pub fn correct_to(&self, pts: i64) -> i64 {
        let mut inner = self.inner.lock();
        let drift = pts - Self::now_unlocked(&inner);
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
        inner.anchored = true;
        drift
    }

    /// 开始推进
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停推进（保持当前位置）
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = Self::now_unlocked(&inner);
            inner.paused = true;
        }
    }

    /// 设置播放速率
    pub fn set_rate(&self, rate: f64) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            let current_time = Self::now_unlocked(&inner);
            inner.base_pts = current_time;
            inner.base_instant = Instant::now();
        }
        inner.playback_rate = rate.max(0.01);
    }

    pub fn rate(&self) -> f64 {
        self.inner.lock().playback_rate
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    fn now_unlocked(inner: &ClockInner) -> i64 {
        if inner.paused {
            inner.paused_at
        } else {
            let elapsed = inner.base_instant.elapsed().as_millis() as i64;
            inner.base_pts + (elapsed as f64 * inner.playback_rate) as i64
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn paused_clock_holds_position() {
        let clock = PlaybackClock::new();
        clock.set_time(500);
        assert_eq!(clock.now(), 500);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), 500);
    }

    #[test]
    fn running_clock_advances() {
        let clock = PlaybackClock::new();
        clock.set_time(0);
        clock.play();
        std::thread::sleep(Duration::from_millis(30));
        assert!(clock.now() >= 20);
    }

    #[test]
    fn pause_then_play_resumes_from_held_position() {
        let clock = PlaybackClock::new();
        clock.set_time(100);
        clock.play();
        std::thread::sleep(Duration::from_millis(20));
        clock.pause();
        let held = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), held);
        clock.play();
        let resumed = clock.now();
        assert!(resumed >= held && resumed < held + 15);
    }

    #[test]
    fn anchor_only_once_until_reset() {
        let clock = PlaybackClock::new();
        assert!(clock.anchor(1000));
        assert!(!clock.anchor(2000));
        assert_eq!(clock.now(), 1000);
        clock.set_time(0);
        assert!(clock.anchor(3000));
    }

    #[test]
    fn correct_to_reports_drift() {
        let clock = PlaybackClock::new();
        clock.set_time(1000);
        let drift = clock.correct_to(1200);
        assert_eq!(drift, 200);
        assert_eq!(clock.now(), 1200);
    }
}

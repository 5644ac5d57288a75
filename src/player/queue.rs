use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use crate::core::{Frame, Packet};

/// 队列元素的预算权重
///
/// 包按字节计，帧按时长（毫秒）计 - 压缩包大小差异太大，按个数限制没有意义。
pub trait Weighted {
    fn weight(&self) -> u64;
}

impl Weighted for Packet {
    fn weight(&self) -> u64 {
        self.byte_size().max(1) as u64
    }
}

impl Weighted for Frame {
    fn weight(&self) -> u64 {
        self.duration().max(1) as u64
    }
}

/// 阻塞 pop 的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// 上游已标记流结束且队列已排空（flush 可复位，用于 EOF 后再 seek）
    Finished,
    /// 队列已终止关闭（stop/teardown）
    Closed,
}

/// 非阻塞 pop 的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPopError {
    Empty,
    Finished,
    Closed,
}

/// 超时 pop 的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopTimeoutError {
    Timeout,
    Finished,
    Closed,
}

/// 阻塞 push 的失败原因
#[derive(Debug)]
pub enum PushError<T> {
    /// 队列已终止关闭，元素原样退回
    Closed(T),
    /// 等待空间期间队列被 flush，元素属于旧代，应当丢弃
    Flushed(T),
}

struct Inner<T> {
    items: VecDeque<T>,
    weight: u64,
    finished: bool,
    closed: bool,
    flushes: u64,
}

/// 有界有序队列 - 解封装/解码/投递环路之间唯一的通信通道
///
/// push 在预算占满时阻塞（背压），pop 在队列空时阻塞；
/// flush 丢弃全部缓冲但不关闭（seek 使用），close 排空后对 pop 返回 Closed。
/// 所有阻塞等待都会被 flush/close 立即唤醒，保证 seek/stop 的响应延迟。
pub struct MediaQueue<T: Weighted> {
    label: &'static str,
    budget: u64,
    inner: Mutex<Inner<T>>,
    ready: Condvar, // pop 侧等待
    space: Condvar, // push 侧等待
}

impl<T: Weighted> MediaQueue<T> {
    pub fn new(label: &'static str, budget: u64) -> Self {
        Self {
            label,
            budget: budget.max(1),
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                weight: 0,
                finished: false,
                closed: false,
                flushes: 0,
            }),
            ready: Condvar::new(),
            space: Condvar::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// 阻塞入队
    ///
    /// 等待空间期间发生 flush（seek）时返回 Flushed - 这个元素属于
    /// 被冲掉的旧代，放进干净队列会污染 seek 后的数据流。
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let w = item.weight();
        let mut inner = self.inner.lock();
        let entry_flushes = inner.flushes;
        loop {
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            if inner.flushes != entry_flushes {
                return Err(PushError::Flushed(item));
            }
            // 预算占满时等待消费；队列为空时允许放入单个超预算元素，避免死锁
            if inner.weight == 0 || inner.weight + w <= self.budget {
                inner.weight += w;
                inner.items.push_back(item);
                self.ready.notify_one();
                return Ok(());
            }
            self.space.wait(&mut inner);
        }
    }

    /// 非阻塞入队
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let w = item.weight();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TryPushError::Closed(item));
        }
        if inner.weight > 0 && inner.weight + w > self.budget {
            return Err(TryPushError::Full(item));
        }
        inner.weight += w;
        inner.items.push_back(item);
        self.ready.notify_one();
        Ok(())
    }

    /// 阻塞出队
    pub fn pop(&self) -> Result<T, PopError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                inner.weight -= item.weight().min(inner.weight);
                self.space.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(PopError::Closed);
            }
            if inner.finished {
                return Err(PopError::Finished);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// 非阻塞出队
    pub fn try_pop(&self) -> Result<T, TryPopError> {
        let mut inner = self.inner.lock();
        if let Some(item) = inner.items.pop_front() {
            inner.weight -= item.weight().min(inner.weight);
            self.space.notify_one();
            return Ok(item);
        }
        if inner.closed {
            Err(TryPopError::Closed)
        } else if inner.finished {
            Err(TryPopError::Finished)
        } else {
            Err(TryPopError::Empty)
        }
    }

    /// 限时阻塞出队 - 投递环路用它检测欠载（缓冲事件）
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopTimeoutError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                inner.weight -= item.weight().min(inner.weight);
                self.space.notify_one();
                return Ok(item);
            }
            if inner.closed {
                return Err(PopTimeoutError::Closed);
            }
            if inner.finished {
                return Err(PopTimeoutError::Finished);
            }
            if self.ready.wait_for(&mut inner, timeout).timed_out() {
                return Err(PopTimeoutError::Timeout);
            }
        }
    }

    /// EOF 后挂起等待：flush（seek）恢复供数时返回 Ok，终止关闭返回 Err
    pub fn wait_reopen(&self) -> Result<(), PopError> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PopError::Closed);
            }
            if !inner.finished || !inner.items.is_empty() {
                return Ok(());
            }
            self.ready.wait(&mut inner);
        }
    }

    /// 丢弃全部缓冲但不关闭，同时复位流结束标记（seek 使用）
    pub fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.weight = 0;
        inner.finished = false;
        inner.flushes += 1;
        self.ready.notify_all();
        self.space.notify_all();
    }

    /// 标记流结束：排空后 pop 返回 Finished（demux 线程 EOF 时使用）
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        self.ready.notify_all();
    }

    /// 终止关闭：唤醒所有等待者，之后 push 失败、排空后 pop 返回 Closed
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.ready.notify_all();
        self.space.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// 当前占用权重（包队列为字节，帧队列为毫秒）
    pub fn occupied(&self) -> u64 {
        self.inner.lock().weight
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}

/// 非阻塞入队的失败原因
#[derive(Debug)]
pub enum TryPushError<T> {
    Full(T),
    Closed(T),
}

use std::io::{Read, Seek, SeekFrom};

use crate::core::{MediaInfo, Packet, Result, StreamDescriptor};

/// 抽象字节源 - 本地文件或网络流的读取句柄
///
/// 内核自己不开文件不开 socket，由调用方交入可读（可选可 seek）的句柄；
/// 句柄归 Demuxer 独占。
pub trait ByteSource: Read + Send {
    /// 定位（不可 seek 的流式源返回错误）
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64>;

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 总长度（字节），未知返回 None
    fn len_hint(&self) -> Option<u64> {
        None
    }

    /// 底层定位符（路径/URL）
    ///
    /// 句柄式原生库（FFmpeg 等）自己做 IO，只认定位符；
    /// 有命名来源的字节源可以在这里透出，纯内存/套接字源返回 None。
    fn path_hint(&self) -> Option<&str> {
        None
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String {
        "<byte source>".to_string()
    }
}

impl ByteSource for std::fs::File {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn len_hint(&self) -> Option<u64> {
        self.metadata().ok().map(|m| m.len())
    }

    fn description(&self) -> String {
        "本地文件".to_string()
    }
}

impl ByteSource for std::io::Cursor<Vec<u8>> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        Seek::seek(self, pos)
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.get_ref().len() as u64)
    }

    fn description(&self) -> String {
        "内存字节源".to_string()
    }
}

/// 解封装器抽象接口
///
/// 所有容器实现（FFmpeg 适配、测试桩等）都实现这个 trait；
/// 并发与状态机逻辑只依赖它，不依赖底层库的句柄生命周期。
pub trait Demuxer: Send {
    /// 容器内的流描述表（打开后不可变）
    fn streams(&self) -> &[StreamDescriptor];

    /// 媒体信息快照
    fn media_info(&self) -> MediaInfo;

    /// 读取下一个压缩包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达流末尾
    /// - Err(DemuxCorrupt): 单包损坏，可跳过重试
    /// - Err(其他): 不可恢复
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek 到目标时间（毫秒）之前最近的关键帧
    ///
    /// seek 后读出的包 pts 可能小于目标 - 由下游丢弃目标前的帧。
    fn seek(&mut self, target_millis: i64) -> Result<()>;

    /// 当前已知总时长（毫秒）- 随索引信息完善而更新，头部不准的流有用
    fn duration_hint(&self) -> Option<i64> {
        self.media_info().duration
    }

    /// 是否支持 seek
    fn is_seekable(&self) -> bool {
        true
    }

    /// 释放容器资源
    fn close(&mut self) {}

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// Demuxer 工厂 - 探测容器头并创建对应的解封装器
///
/// 探测失败时返回 Unrecognized（没有匹配的容器格式）或 Truncated（头部不完整）。
pub trait DemuxerFactory: Send + Sync {
    fn open(&self, source: Box<dyn ByteSource>) -> Result<Box<dyn Demuxer>>;
}

use thiserror::Error;

/// 错误类别 - 用于对外事件上报（error(kind, message)）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    Demux,
    Decode,
    Conversion,
    Io,
    State,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Open => "open",
            ErrorKind::Demux => "demux",
            ErrorKind::Decode => "decode",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Io => "io",
            ErrorKind::State => "state",
            ErrorKind::Other => "other",
        }
    }
}

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("无法识别的容器格式: {0}")]
    Unrecognized(String),

    #[error("容器头不完整: {0}")]
    Truncated(String),

    #[error("解封装错误（可恢复，跳过该包）: {0}")]
    DemuxCorrupt(String),

    #[error("解封装错误（不可恢复）: {0}")]
    DemuxFatal(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("解码错误（可恢复，丢弃该帧）: {0}")]
    DecodeRecoverable(String),

    #[error("解码错误（致命，流已禁用）: {0}")]
    DecodeFatal(String),

    #[error("格式转换不支持: {0}")]
    Conversion(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("没有可解码的媒体流")]
    NoPlayableStream,

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("其他错误: {0}")]
    Other(String),

    #[error("Anyhow 错误: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl PlayerError {
    /// 是否为组件内部可吸收的错误（记日志后继续）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlayerError::DemuxCorrupt(_) | PlayerError::DecodeRecoverable(_)
        )
    }

    /// 错误类别（对外事件使用）
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlayerError::Unrecognized(_) | PlayerError::Truncated(_) => ErrorKind::Open,
            PlayerError::DemuxCorrupt(_)
            | PlayerError::DemuxFatal(_)
            | PlayerError::SeekError(_) => ErrorKind::Demux,
            PlayerError::DecodeRecoverable(_) | PlayerError::DecodeFatal(_) => ErrorKind::Decode,
            PlayerError::Conversion(_) => ErrorKind::Conversion,
            PlayerError::IoError(_) => ErrorKind::Io,
            PlayerError::InvalidState(_) => ErrorKind::State,
            PlayerError::NoPlayableStream
            | PlayerError::AudioError(_)
            | PlayerError::Other(_)
            | PlayerError::AnyhowError(_) => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

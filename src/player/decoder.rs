use crate::core::{Frame, Packet, Result, StreamDescriptor};

/// submit 的受理结果
#[derive(Debug)]
pub enum SubmitStatus {
    Accepted,
    /// 解码器暂时拒收（内部缓冲已满等），包原样退回，调用方先 retrieve 再重试
    Rejected { packet: Packet, reason: String },
}

/// retrieve 的产出
#[derive(Debug)]
pub enum DecodeOutput {
    Frame(Frame),
    /// 不是错误：参考帧类格式要喂入多个包才出帧
    NeedMoreInput,
    /// submit_eof 之后内部缓冲已排空
    EndOfStream,
}

/// 解码器抽象接口（每条流一个实例，独占该流的包队列读端）
///
/// 解码器有状态：submit/retrieve 分离，NeedMoreInput 表示还要继续喂包。
/// 带 discard 标记的包作为有损提示提交，解码器可以出降质帧，
/// 也可以报 DecodeRecoverable - 上层记日志后继续。
pub trait MediaDecoder: Send {
    /// 提交一个压缩包
    fn submit(&mut self, packet: Packet) -> Result<SubmitStatus>;

    /// 通知无更多输入，之后 retrieve 排空内部缓冲直至 EndOfStream
    fn submit_eof(&mut self);

    /// 取回一个解码帧
    fn retrieve(&mut self) -> Result<DecodeOutput>;

    /// 丢弃缓冲的参考帧状态并复位 EOF 标记 - 每次 seek 都会调用
    fn flush(&mut self);

    /// 获取解码器描述（用于日志）
    fn info(&self) -> String {
        "软件解码".to_string()
    }
}

/// 解码器工厂 - 按流描述创建解码器
pub trait DecoderFactory: Send + Sync {
    fn create(&self, descriptor: &StreamDescriptor) -> Result<Box<dyn MediaDecoder>>;
}

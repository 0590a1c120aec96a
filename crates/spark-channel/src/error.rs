//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为通道层对外暴露的失败语义提供集中定义：访问模式违例、不支持的操作、
//!   传输层 IO 失败、配置拒绝以及内部不变量破坏；
//! - 读取到流末尾不属于错误，由 [`ReadStatus::Eof`](crate::ReadStatus::Eof) 表达。
//!
//! ## 设计要求（What）
//! - 每个变体都有稳定的点分错误码（见 [`codes`]），便于日志与指标聚合；
//! - [`ErrorCategory`] 给出粗粒度分类，调用方据此决定是否向脚本层抛出或直接中止；
//! - `Invariant` 仅用于管线装配缺陷，普通调用方不应尝试恢复。

use std::io;

use thiserror::Error;

/// 通道层稳定错误码。
pub mod codes {
    /// 在未以读模式打开的通道上读取。
    pub const NOT_READABLE: &str = "spark.channel.not_readable";
    /// 在未以写模式打开的通道上写入或刷新。
    pub const NOT_WRITABLE: &str = "spark.channel.not_writable";
    /// 非阻塞写入尚未实现。
    pub const NON_BLOCKING_WRITE: &str = "spark.channel.non_blocking_write";
    /// 通道已关闭。
    pub const CLOSED: &str = "spark.channel.closed";
    /// 传输不支持 seek/tell。
    pub const UNSUPPORTED: &str = "spark.channel.unsupported";
    /// 底层传输 IO 失败。
    pub const TRANSPORT_IO: &str = "spark.channel.transport_io";
    /// 编码名称无法识别。
    pub const UNKNOWN_ENCODING: &str = "spark.channel.unknown_encoding";
    /// 缓冲区大小越界。
    pub const INVALID_BUFFER_SIZE: &str = "spark.channel.invalid_buffer_size";
    /// 管线装配或命名等内部不变量被破坏。
    pub const INVARIANT: &str = "spark.channel.invariant";
}

/// 错误的粗粒度分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 读写方向、阻塞模式或关闭状态与操作不符，可恢复。
    AccessMode,
    /// 传输未实现该操作，调用方可选择忽略。
    Unsupported,
    /// 传输层 IO 失败，原样上抛，不做重试。
    Transport,
    /// 配置值被拒绝，原配置保持不变。
    Configuration,
    /// 程序缺陷，不应被普通调用方捕获。
    Invariant,
}

/// 通道层统一错误类型。
///
/// # 教案式说明
/// - **意图 (Why)**：通道层所有失败收敛为一个可 `?` 传播的枚举；
/// - **契约 (What)**：访问模式类错误的文案包含通道名，便于脚本层直接展示；
///   `Io` 变体保留原始 [`io::Error`]，不改写其种类；
/// - **注意事项 (Trade-offs)**：通道名以 `String` 保存，每次构造错误会有一次分配，
///   错误路径不在热路径上，可以接受。
#[derive(Debug, Error)]
pub enum ChannelError {
    /// 通道未以读模式打开。
    #[error("channel \"{channel}\" wasn't opened for reading")]
    NotReadable { channel: String },

    /// 通道未以写模式打开。
    #[error("channel \"{channel}\" wasn't opened for writing")]
    NotWritable { channel: String },

    /// 通道处于非阻塞模式时请求写入。
    #[error("channel \"{channel}\": non-blocking write I/O not yet implemented")]
    NonBlockingWrite { channel: String },

    /// 通道已经关闭，管线不可再用。
    #[error("channel \"{channel}\" is closed")]
    Closed { channel: String },

    /// 传输未实现请求的操作（seek、tell 等）。
    #[error("error during {op} on \"{channel}\": invalid argument")]
    Unsupported { channel: String, op: &'static str },

    /// 底层传输失败。
    #[error(transparent)]
    Io(#[from] io::Error),

    /// 编码名称未知。
    #[error("unknown encoding \"{name}\"")]
    UnknownEncoding { name: String },

    /// 缓冲区大小不在 `[1, 1 MiB]` 内。
    #[error("buffer size {requested} is outside the accepted range [1, {max}]")]
    InvalidBufferSize { requested: usize, max: usize },

    /// 内部不变量被破坏。
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl ChannelError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::NotReadable { .. } => codes::NOT_READABLE,
            ChannelError::NotWritable { .. } => codes::NOT_WRITABLE,
            ChannelError::NonBlockingWrite { .. } => codes::NON_BLOCKING_WRITE,
            ChannelError::Closed { .. } => codes::CLOSED,
            ChannelError::Unsupported { .. } => codes::UNSUPPORTED,
            ChannelError::Io(_) => codes::TRANSPORT_IO,
            ChannelError::UnknownEncoding { .. } => codes::UNKNOWN_ENCODING,
            ChannelError::InvalidBufferSize { .. } => codes::INVALID_BUFFER_SIZE,
            ChannelError::Invariant(_) => codes::INVARIANT,
        }
    }

    /// 返回错误分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::NotReadable { .. }
            | ChannelError::NotWritable { .. }
            | ChannelError::NonBlockingWrite { .. }
            | ChannelError::Closed { .. } => ErrorCategory::AccessMode,
            ChannelError::Unsupported { .. } => ErrorCategory::Unsupported,
            ChannelError::Io(_) => ErrorCategory::Transport,
            ChannelError::UnknownEncoding { .. } | ChannelError::InvalidBufferSize { .. } => {
                ErrorCategory::Configuration
            }
            ChannelError::Invariant(_) => ErrorCategory::Invariant,
        }
    }

    /// 是否为调用方不应处理的内部缺陷。
    pub fn is_invariant(&self) -> bool {
        self.category() == ErrorCategory::Invariant
    }
}

/// 通道层 `Result` 别名。
pub type Result<T, E = ChannelError> = std::result::Result<T, E>;

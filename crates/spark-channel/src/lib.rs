//! `spark-channel` 为脚本运行时提供统一的 I/O 通道层。
//!
//! # 模块定位（Why）
//! - 文件、套接字、管道、内存缓冲等传输各自只负责交出原始读端与写端，
//!   缓冲、按行读取、换行转换、编码转换、EOF 标记、阻塞语义由本 crate 统一实现；
//! - 每次读写都经过一条由独立有状态阶段组成的过滤链，配置变更（定位、换编码、
//!   换 EOF 标记、换缓冲策略）推入或重置已经构建好的链。
//!
//! # 设计概要（How）
//! - [`transport`]：[`Transport`] 钩子与进程内实现 [`MemoryTransport`]；
//! - [`pipeline`]：输入侧 `EofFilter → InputBuffer → Markable → Decoder → EolFilter`
//!   与输出侧 [`OutputStage`](pipeline::OutputStage)，以 [`ByteSource`](pipeline::ByteSource)/
//!   [`CharSource`](pipeline::CharSource) 两个能力接口串联；
//! - [`Channel`]：惰性构建两个方向的过滤链，分派读写并下推配置；
//! - [`SharedChannel`]：多所有者共享与“最后一个所有者关闭”规则。
//!
//! # 契约说明（What）
//! - 读取以 [`ReadStatus::Eof`]（码值 `-1`）表示流结束，错误统一为 [`ChannelError`]，
//!   每个变体带稳定错误码；
//! - 配置可经 `serde` 从 [`ChannelOptions`] 反序列化后一次性应用；
//! - 关键事件（过滤链构建与释放、定位重置、EOF 标记追加）通过 `tracing` 以 `debug` 级别输出。

pub mod config;
pub mod encoding;
pub mod error;
pub mod pipeline;
pub mod transport;

mod channel;
mod shared;

pub use channel::{Channel, ChannelData, ReadKind, ReadStatus};
pub use config::{Buffering, ChannelOptions, OpenMode, Translation};
pub use encoding::TextEncoding;
pub use error::{ChannelError, ErrorCategory, Result};
pub use pipeline::OutputValue;
pub use shared::SharedChannel;
pub use transport::{MemoryTransport, Transport, TransportKind};

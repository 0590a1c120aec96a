//! 传输钩子：通道从具体传输获取原始读端与写端。
//!
//! # 设计初衷（Why）
//! - 通道层只关心“从哪里读字节、往哪里写字节”，文件、套接字、管道等具体后端由各自的实现提供；
//! - 以 trait 形式注入，`Channel<T: Transport>` 在编译期单态化，调用不经过虚表。
//!
//! # 契约说明（What）
//! - [`Transport::raw_input`] 与 [`Transport::raw_output`] 各自只在对应方向首次使用时调用一次；
//! - `seek`/`tell`/`close` 有默认实现：不支持定位、没有位置、关闭无操作；
//! - 通道关闭时先拆除过滤链，再调用 [`Transport::close`]，过滤链本身从不关闭传输。

use core::fmt;
use std::io::{self, SeekFrom};

use crate::pipeline::{RawSink, RawSource};

mod memory;

pub use memory::MemoryTransport;

/// 传输种类标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 文件，落盘介质。
    File,
    /// 网络套接字。
    Socket,
    /// 进程管道。
    Pipe,
    /// 进程内内存缓冲。
    Memory,
    /// 其他自定义传输。
    Custom(&'static str),
}

impl TransportKind {
    /// 标签名，同时用作通道名前缀。
    pub fn name(&self) -> &'static str {
        match self {
            TransportKind::File => "file",
            TransportKind::Socket => "sock",
            TransportKind::Pipe => "pipe",
            TransportKind::Memory => "mem",
            TransportKind::Custom(name) => name,
        }
    }

    /// 刷出后是否需要强制同步到介质。
    pub fn requires_sync(&self) -> bool {
        matches!(self, TransportKind::File)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 通道所依赖的传输能力。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把后端差异收敛到少量钩子里，过滤链的构建、配置下推与关闭流程都由通道统一完成。
///
/// ## 逻辑（How）
/// - 首次读取时通道调用 `raw_input` 构建输入链，首次写入时调用 `raw_output` 构建输出阶段；
/// - 定位先由通道刷出输出缓冲，再调用 `seek`，随后重置输入链。
///
/// ## 契约（What）
/// - 原始读端在暂无数据时应返回 [`io::ErrorKind::WouldBlock`]，真正结束时返回 `Ok(0)`；
/// - `seek` 返回新的绝对位置；不支持时返回 [`io::ErrorKind::Unsupported`]；
/// - `tell` 返回 `Ok(None)` 表示该传输没有位置概念。
pub trait Transport {
    /// 传输种类。
    fn kind(&self) -> TransportKind;

    /// 取得原始读端。
    fn raw_input(&mut self) -> io::Result<RawSource>;

    /// 取得原始写端。
    fn raw_output(&mut self) -> io::Result<Box<dyn RawSink>>;

    /// 定位到新位置。
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let _ = pos;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "transport does not support seeking",
        ))
    }

    /// 当前位置。
    fn tell(&mut self) -> io::Result<Option<u64>> {
        Ok(None)
    }

    /// 释放传输资源。
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

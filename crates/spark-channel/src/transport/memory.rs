use std::io::{self, Read, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Transport, TransportKind};
use crate::pipeline::{RawSink, RawSource};

#[derive(Debug, Default)]
struct MemoryState {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    last_write: bool,
    open_ended: bool,
    closed: bool,
    syncs: usize,
}

/// 进程内内存传输。
///
/// # 行为概览
/// - 读写各有游标：写入从写游标处覆盖或追加，读取从读游标处取出，先写后读能读到刚写的内容；
/// - `seek` 同时移动两个游标，`tell` 报告最近一次使用的那一侧的游标；
/// - 开放模式（[`open_ended`](Self::open_ended)）下读到末尾返回 `WouldBlock`，
///   直到 [`finish`](Self::finish) 之后才报告流结束，用来模拟非阻塞数据源；
/// - 克隆得到的句柄共享同一块内存，测试可在通道之外继续 [`feed`](Self::feed) 数据或检查内容。
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    kind: TransportKind,
}

impl MemoryTransport {
    /// 空缓冲。
    pub fn new() -> Self {
        Self::with_data(Vec::new())
    }

    /// 以给定内容为初始数据。
    pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                data: data.into(),
                ..MemoryState::default()
            })),
            kind: TransportKind::Memory,
        }
    }

    /// 开放模式：数据读完后报告“暂无数据”而非流结束。
    pub fn open_ended() -> Self {
        let transport = Self::new();
        transport.state.lock().open_ended = true;
        transport
    }

    /// 改变报告的传输种类，例如以 `File` 触发强制同步。
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// 在末尾追加可供读取的数据，不移动写游标。
    pub fn feed(&self, bytes: &[u8]) {
        self.state.lock().data.extend_from_slice(bytes);
    }

    /// 结束开放模式，之后读到末尾即为流结束。
    pub fn finish(&self) {
        self.state.lock().open_ended = false;
    }

    /// 当前全部内容的拷贝。
    pub fn contents(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// 写端被要求同步到介质的次数。
    pub fn sync_count(&self) -> usize {
        self.state.lock().syncs
    }

    /// 传输是否已被关闭。
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn raw_input(&mut self) -> io::Result<RawSource> {
        Ok(Box::new(MemoryReader {
            state: Arc::clone(&self.state),
        }))
    }

    fn raw_output(&mut self) -> io::Result<Box<dyn RawSink>> {
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
        }))
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state.lock();
        let current = if state.last_write {
            state.write_pos
        } else {
            state.read_pos
        };
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::End(delta) => state.data.len() as i128 + i128::from(delta),
            SeekFrom::Current(delta) => current as i128 + i128::from(delta),
        };
        let target = usize::try_from(target).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        state.read_pos = target;
        state.write_pos = target;
        Ok(target as u64)
    }

    fn tell(&mut self) -> io::Result<Option<u64>> {
        let state = self.state.lock();
        let pos = if state.last_write {
            state.write_pos
        } else {
            state.read_pos
        };
        Ok(Some(pos as u64))
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

struct MemoryReader {
    state: Arc<Mutex<MemoryState>>,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.last_write = false;
        let start = state.read_pos.min(state.data.len());
        let n = (state.data.len() - start).min(buf.len());
        if n == 0 && !buf.is_empty() && state.open_ended {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.read_pos = start + n;
        Ok(n)
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        state.last_write = true;
        let start = state.write_pos;
        if state.data.len() < start {
            state.data.resize(start, 0);
        }
        let overlap = (state.data.len() - start).min(buf.len());
        state.data[start..start + overlap].copy_from_slice(&buf[..overlap]);
        state.data.extend_from_slice(&buf[overlap..]);
        state.write_pos = start + buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RawSink for MemoryWriter {
    fn sync_data(&mut self) -> io::Result<()> {
        self.state.lock().syncs += 1;
        Ok(())
    }
}

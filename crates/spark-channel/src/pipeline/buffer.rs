use std::io;

use bytes::{Buf, BytesMut};

use super::{ByteSource, Progress};
use crate::config::Buffering;

/// 按缓冲策略批量读取上游的输入缓冲阶段。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 上游可能是慢速传输，`Full`/`Line` 策略下一次尽量读满 `size` 字节，减少系统调用；
/// - 非阻塞读取需要区分“暂无数据”与“已到末尾”，本阶段记录最近一次读取是否因前者而不足。
///
/// ## 逻辑 (How)
/// - `Full`：缓存为空时向上游发起一次读取，容量为 `size`；
/// - `Line`：填充方式同 `Full`，但一次最多交出一行（含 `\n`）；
/// - `None`：直通，每次请求对应一次上游调用，不缓存；
/// - 阻塞模式下上游报告 `WouldBlock` 时让出线程后重试。
///
/// ## 契约 (What)
/// - 上游的流结束是粘滞的，直到 [`cancel_eof`](Self::cancel_eof) 或 [`seek_reset`](Self::seek_reset)；
/// - `last_read_would_block` 仅反映最近一次访问上游的结果。
pub struct InputBuffer<S> {
    inner: S,
    cache: BytesMut,
    size: usize,
    buffering: Buffering,
    blocking: bool,
    eof: bool,
    last_read_would_block: bool,
}

impl<S: ByteSource> InputBuffer<S> {
    /// 以 `size` 字节的缓冲区与 `buffering` 策略包装上游，默认阻塞。
    pub fn new(inner: S, size: usize, buffering: Buffering) -> Self {
        Self {
            inner,
            cache: BytesMut::with_capacity(size),
            size,
            buffering,
            blocking: true,
            eof: false,
            last_read_would_block: false,
        }
    }

    /// 上游阶段。
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// 上游阶段的可变引用。
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// 切换阻塞模式；阻塞时上游的 `WouldBlock` 会被重试。
    pub fn set_blocking_mode(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// 更换缓冲区大小，下一次填充时生效。
    pub fn set_buffer_size(&mut self, size: usize) {
        self.size = size;
    }

    /// 更换缓冲策略。
    pub fn set_buffering(&mut self, buffering: Buffering) {
        self.buffering = buffering;
    }

    /// 当前缓冲策略。
    pub fn buffering(&self) -> Buffering {
        self.buffering
    }

    /// 当前缓冲区大小。
    pub fn buffer_size(&self) -> usize {
        self.size
    }

    /// 最近一次访问上游是否因暂无数据而未读到内容。
    pub fn last_read_would_block(&self) -> bool {
        self.last_read_would_block
    }

    /// 撤销粘滞的流结束状态，下次读取会重新询问上游。
    pub fn cancel_eof(&mut self) {
        self.eof = false;
    }

    /// 取走尚未交出的缓存字节。
    pub fn take_cached(&mut self) -> BytesMut {
        self.cache.split()
    }

    /// 丢弃缓存并清除流结束与暂无数据标志。
    pub fn seek_reset(&mut self) {
        self.cache.clear();
        self.eof = false;
        self.last_read_would_block = false;
    }

    fn read_upstream(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
        let progress = loop {
            match self.inner.read_bytes(buf)? {
                Progress::WouldBlock if self.blocking => std::thread::yield_now(),
                other => break other,
            }
        };
        self.last_read_would_block = progress == Progress::WouldBlock;
        if progress == Progress::Eof {
            self.eof = true;
        }
        Ok(progress)
    }

    fn fill(&mut self) -> io::Result<Progress> {
        let mut chunk = std::mem::take(&mut self.cache);
        chunk.clear();
        chunk.resize(self.size.max(1), 0);
        let progress = self.read_upstream(&mut chunk);
        let filled = match &progress {
            Ok(p) => p.count(),
            Err(_) => 0,
        };
        chunk.truncate(filled);
        self.cache = chunk;
        progress
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let mut n = self.cache.len().min(buf.len());
        if self.buffering == Buffering::Line {
            if let Some(newline) = self.cache[..n].iter().position(|b| *b == b'\n') {
                n = newline + 1;
            }
        }
        buf[..n].copy_from_slice(&self.cache[..n]);
        self.cache.advance(n);
        n
    }
}

impl<S: ByteSource> ByteSource for InputBuffer<S> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
        if buf.is_empty() {
            return Ok(Progress::Ready(0));
        }
        if !self.cache.is_empty() {
            return Ok(Progress::Ready(self.drain_into(buf)));
        }
        if self.eof {
            return Ok(Progress::Eof);
        }
        match self.buffering {
            Buffering::None => self.read_upstream(buf),
            Buffering::Full | Buffering::Line => match self.fill()? {
                Progress::Ready(_) => Ok(Progress::Ready(self.drain_into(buf))),
                other => Ok(other),
            },
        }
    }

    fn available(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedSource;

    #[test]
    fn full_buffering_batches_upstream_reads() {
        let source = ScriptedSource::new([Some(&b"abcdef"[..])]);
        let mut buffer = InputBuffer::new(source, 64, Buffering::Full);
        let mut out = [0u8; 2];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(2));
        assert_eq!(buffer.available(), 4);
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(2));
        assert_eq!(buffer.get_ref().calls, 1);
    }

    #[test]
    fn none_buffering_passes_through() {
        let source = ScriptedSource::new([Some(&b"abcdef"[..])]);
        let mut buffer = InputBuffer::new(source, 64, Buffering::None);
        let mut out = [0u8; 2];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(2));
        assert_eq!(buffer.available(), 0);
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(2));
        assert_eq!(buffer.get_ref().calls, 2);
    }

    #[test]
    fn line_buffering_hands_out_one_line() {
        let source = ScriptedSource::new([Some(&b"ab\ncd\n"[..])]);
        let mut buffer = InputBuffer::new(source, 64, Buffering::Line);
        let mut out = [0u8; 16];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(3));
        assert_eq!(&out[..3], b"ab\n");
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(3));
    }

    #[test]
    fn would_block_is_reported_in_non_blocking_mode() {
        let source = ScriptedSource::new([None, Some(&b"x"[..])]);
        let mut buffer = InputBuffer::new(source, 8, Buffering::Full);
        buffer.set_blocking_mode(false);
        let mut out = [0u8; 4];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::WouldBlock);
        assert!(buffer.last_read_would_block());
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(1));
        assert!(!buffer.last_read_would_block());
    }

    #[test]
    fn blocking_mode_retries_would_block() {
        let source = ScriptedSource::new([None, None, Some(&b"ok"[..])]);
        let mut buffer = InputBuffer::new(source, 8, Buffering::Full);
        let mut out = [0u8; 4];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Ready(2));
        assert_eq!(buffer.get_ref().calls, 3);
    }

    #[test]
    fn eof_is_sticky_until_cancelled() {
        let source = ScriptedSource::new(Vec::<Option<&'static [u8]>>::new());
        let mut buffer = InputBuffer::new(source, 8, Buffering::Full);
        let mut out = [0u8; 4];
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Eof);
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Eof);
        assert_eq!(buffer.get_ref().calls, 1);
        buffer.cancel_eof();
        assert_eq!(buffer.read_bytes(&mut out).expect("read"), Progress::Eof);
        assert_eq!(buffer.get_ref().calls, 2);
    }
}

use std::io::{self, ErrorKind};

use bytes::{Buf, BytesMut};

use super::{ByteSource, Progress};

/// 可标记、可回退的字节源。
pub trait Lookahead: ByteSource {
    /// 在当前位置设置标记，最多回看 `limit` 字节。
    fn mark(&mut self, limit: usize);

    /// 回到标记处。
    fn reset(&mut self) -> io::Result<()>;
}

/// 提供有界回看能力的字节包装层。
///
/// # 设计动机（Why）
/// - 解码等下游阶段有时要先读几个字节才能决定如何解释（例如判断流首是否带 BOM），
///   判断失败时需要把这些字节原样退回。
///
/// # 行为概览（How）
/// - [`mark`](Self::mark) 之后读出的字节会被记录，至多 `limit` 字节，超出则标记失效；
/// - [`reset`](Self::reset) 把读位置拨回标记处，随后的读取先重放记录的字节；
/// - 未标记且重放区读空时直接透传上游，不做额外复制。
pub struct Markable<S> {
    inner: S,
    replay: BytesMut,
    pos: usize,
    limit: Option<usize>,
}

impl<S: ByteSource> Markable<S> {
    /// 包装上游，初始无标记。
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            replay: BytesMut::new(),
            pos: 0,
            limit: None,
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

    /// 放弃标记，已读过的记录字节随之丢弃。
    pub fn unmark(&mut self) {
        self.limit = None;
        self.compact();
    }

    /// 是否存在有效标记。
    pub fn is_marked(&self) -> bool {
        self.limit.is_some()
    }

    /// 本层待重放的字节数（不含上游缓存）。
    pub fn replay_len(&self) -> usize {
        self.replay.len() - self.pos
    }

    /// 取走待重放的字节，标记随之失效。
    pub fn take_replay(&mut self) -> BytesMut {
        self.replay.advance(self.pos);
        self.pos = 0;
        self.limit = None;
        self.replay.split()
    }

    /// 丢弃重放区与标记。
    pub fn seek_reset(&mut self) {
        self.replay.clear();
        self.pos = 0;
        self.limit = None;
    }

    fn compact(&mut self) {
        if self.limit.is_none() {
            self.replay.advance(self.pos);
            self.pos = 0;
        }
    }
}

impl<S: ByteSource> Lookahead for Markable<S> {
    fn mark(&mut self, limit: usize) {
        self.replay.advance(self.pos);
        self.pos = 0;
        self.limit = Some(limit);
    }

    /// 回到标记处；标记随之清除，已记录的字节留待重放。
    fn reset(&mut self) -> io::Result<()> {
        match self.limit.take() {
            Some(_) => {
                self.pos = 0;
                Ok(())
            }
            None => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "reset without a valid mark",
            )),
        }
    }
}

impl<S: ByteSource> ByteSource for Markable<S> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
        if buf.is_empty() {
            return Ok(Progress::Ready(0));
        }
        if self.pos < self.replay.len() {
            let n = (self.replay.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.replay[self.pos..self.pos + n]);
            self.pos += n;
            self.compact();
            return Ok(Progress::Ready(n));
        }
        let progress = self.inner.read_bytes(buf)?;
        if let (Some(limit), Progress::Ready(n)) = (self.limit, progress) {
            if self.replay.len() + n > limit {
                self.limit = None;
                self.replay.clear();
                self.pos = 0;
            } else {
                self.replay.extend_from_slice(&buf[..n]);
                self.pos = self.replay.len();
            }
        }
        Ok(progress)
    }

    fn available(&self) -> usize {
        self.replay_len() + self.inner.available()
    }
}

use std::io::{self, ErrorKind, Read};

use bytes::{Buf, BytesMut};

use super::{ByteSource, Progress};

/// 在哨兵字节处截断字节流的输入过滤器。
///
/// # 教案式说明
/// - **意图 (Why)**：脚本层可以把某个字节（如 `0x1A`）当作逻辑上的文件结尾，
///   与传输真实的流结束无关；
/// - **逻辑 (How)**：每次读取后扫描哨兵；命中后只交出哨兵之前的字节，
///   哨兵及其后的字节存入 `held`，此后一律报告流结束；
/// - **契约 (What)**：`held` 中的字节不会丢失，更换或取消哨兵后会被重新扫描并交出；
///   `seek_reset` 丢弃它们，因为定位之后旧数据已失效。
pub struct EofFilter<R> {
    inner: R,
    eof_char: u8,
    saw_eof_char: bool,
    held: BytesMut,
}

impl<R: Read> EofFilter<R> {
    /// 以哨兵 `eof_char` 包装原始读端，0 表示不启用。
    pub fn new(inner: R, eof_char: u8) -> Self {
        Self {
            inner,
            eof_char,
            saw_eof_char: false,
            held: BytesMut::new(),
        }
    }

    /// 是否已经遇到哨兵。
    pub fn saw_eof_char(&self) -> bool {
        self.saw_eof_char
    }

    /// 当前哨兵。
    pub fn eof_char(&self) -> u8 {
        self.eof_char
    }

    /// 更换哨兵并清除命中标志，旧哨兵不再追溯生效。
    pub fn set_eof_char(&mut self, eof_char: u8) {
        self.eof_char = eof_char;
        self.saw_eof_char = false;
    }

    /// 把下游已缓存的字节退回本层，下次读取时先于 `held` 重新扫描。
    pub fn unread(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut front = BytesMut::with_capacity(data.len() + self.held.len());
        front.extend_from_slice(data);
        front.extend_from_slice(&self.held);
        self.held = front;
    }

    /// 本层暂存、尚未交出的字节数。
    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// 清除命中标志并丢弃暂存字节。
    pub fn seek_reset(&mut self) {
        self.saw_eof_char = false;
        self.held.clear();
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
        if !self.held.is_empty() {
            let n = self.held.len().min(buf.len());
            buf[..n].copy_from_slice(&self.held[..n]);
            self.held.advance(n);
            return Ok(Progress::Ready(n));
        }
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(Progress::Eof),
                Ok(n) => return Ok(Progress::Ready(n)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(Progress::WouldBlock),
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R: Read> ByteSource for EofFilter<R> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
        if self.saw_eof_char {
            return Ok(Progress::Eof);
        }
        if buf.is_empty() {
            return Ok(Progress::Ready(0));
        }
        let n = match self.read_raw(buf)? {
            Progress::Ready(n) => n,
            other => return Ok(other),
        };
        if self.eof_char == 0 {
            return Ok(Progress::Ready(n));
        }
        match buf[..n].iter().position(|byte| *byte == self.eof_char) {
            None => Ok(Progress::Ready(n)),
            Some(at) => {
                self.saw_eof_char = true;
                self.unread(&buf[at..n]);
                if at == 0 {
                    Ok(Progress::Eof)
                } else {
                    Ok(Progress::Ready(at))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<R: Read>(filter: &mut EofFilter<R>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        while let Progress::Ready(n) = filter.read_bytes(&mut buf).expect("read") {
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn stops_at_sentinel() {
        let mut filter = EofFilter::new(&b"hi\x1amore"[..], 0x1a);
        assert_eq!(drain(&mut filter), b"hi");
        assert!(filter.saw_eof_char());
        assert_eq!(filter.read_bytes(&mut [0u8; 8]).expect("read"), Progress::Eof);
    }

    #[test]
    fn removing_sentinel_surfaces_held_bytes() {
        let mut filter = EofFilter::new(&b"ab\x1acd"[..], 0x1a);
        assert_eq!(drain(&mut filter), b"ab");
        filter.set_eof_char(0);
        assert_eq!(drain(&mut filter), b"\x1acd");
    }

    #[test]
    fn seek_reset_clears_flag_and_held_bytes() {
        let mut filter = EofFilter::new(&b"x\x1ayz"[..], 0x1a);
        assert_eq!(drain(&mut filter), b"x");
        filter.seek_reset();
        assert!(!filter.saw_eof_char());
        assert_eq!(filter.held_len(), 0);
    }

    #[test]
    fn unread_bytes_are_rescanned() {
        let mut filter = EofFilter::new(&b""[..], 0);
        filter.unread(b"12#34");
        filter.set_eof_char(b'#');
        assert_eq!(drain(&mut filter), b"12");
    }
}

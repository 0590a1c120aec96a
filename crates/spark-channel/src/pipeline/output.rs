use std::io::{self, Write};

use bytes::BytesMut;
use encoding_rs::EncoderResult;

use crate::config::{Buffering, Translation};
use crate::encoding::{TextEncoding, latin1_byte};

/// 原始写端：在 [`Write`] 之上增加可选的“同步到介质”能力。
pub trait RawSink: Write + Send {
    /// 把已写出的数据同步到持久介质。默认无操作。
    fn sync_data(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RawSink for Vec<u8> {}

impl RawSink for std::fs::File {
    fn sync_data(&mut self) -> io::Result<()> {
        std::fs::File::sync_data(&*self)
    }
}

/// 一次写入的载荷。
///
/// 字节载荷按 U+0000–U+00FF 的字符看待，与文本载荷走同一条转换路径。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputValue<'a> {
    /// 文本。
    Text(&'a str),
    /// 原始字节。
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for OutputValue<'a> {
    fn from(text: &'a str) -> Self {
        OutputValue::Text(text)
    }
}

impl<'a> From<&'a String> for OutputValue<'a> {
    fn from(text: &'a String) -> Self {
        OutputValue::Text(text.as_str())
    }
}

impl<'a> From<&'a [u8]> for OutputValue<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        OutputValue::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for OutputValue<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        OutputValue::Bytes(bytes)
    }
}

/// 输出阶段：换行转换、编码、缓冲，以及关闭时追加 EOF 标记。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 输出侧各项转换彼此独立且总是按固定顺序发生，合并为一个阶段即可，
///   不必像输入侧那样拆成多层。
///
/// ## 逻辑 (How)
/// 1. `\n` 按输出转换模式替换为对应换行序列；
/// 2. 按编码转为字节：二进制取每个字符的低 8 位；UTF-16 直接按字节序展开；
///    其余编码交给 `encoding_rs`，无法映射的字符写成 `?`；
/// 3. 写入内部缓冲，按策略决定是否立即刷出：`Full` 在缓冲达到 `size` 时刷出，
///    `Line` 在载荷含换行时刷出，`None` 每次都刷出；
/// 4. 开启强制同步时，每次刷出数据后调用 [`RawSink::sync_data`]。
///
/// ## 契约 (What)
/// - [`close`](Self::close) 只生效一次：结束编码器状态、追加 EOF 字节（若配置）并刷出；
/// - 本阶段不关闭底层传输，关闭传输由通道负责。
pub struct OutputStage {
    sink: Box<dyn RawSink>,
    encoding: Option<TextEncoding>,
    encoder: Option<encoding_rs::Encoder>,
    translation: Translation,
    buffering: Buffering,
    size: usize,
    blocking: bool,
    sync: bool,
    eof_char: u8,
    buf: BytesMut,
    text: String,
    closed: bool,
}

impl OutputStage {
    /// 以给定编码、换行模式与缓冲策略包装原始写端；默认阻塞、不强制同步。
    pub fn new(
        sink: Box<dyn RawSink>,
        encoding: Option<TextEncoding>,
        translation: Translation,
        buffering: Buffering,
        size: usize,
    ) -> Self {
        Self {
            sink,
            encoding,
            encoder: new_encoder(encoding),
            translation,
            buffering,
            size,
            blocking: true,
            sync: false,
            eof_char: 0,
            buf: BytesMut::with_capacity(size),
            text: String::new(),
            closed: false,
        }
    }

    /// 写入一段载荷，必要时刷出。
    pub fn write(&mut self, value: OutputValue<'_>) -> io::Result<()> {
        let newline = self.translate(value);
        let text = std::mem::take(&mut self.text);
        self.encode(&text, false);
        self.text = text;
        let due = match self.buffering {
            Buffering::Full => self.buf.len() >= self.size,
            Buffering::Line => newline || self.buf.len() >= self.size,
            Buffering::None => true,
        };
        if due { self.flush() } else { Ok(()) }
    }

    /// 把缓冲内容交给原始写端。
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf)?;
            self.buf.clear();
            self.sink.flush()?;
            if self.sync {
                self.sink.sync_data()?;
            }
            return Ok(());
        }
        self.sink.flush()
    }

    /// 结束输出：冲刷编码器状态，追加 EOF 字节，刷出缓冲。重复调用无效果。
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finish_encoder();
        if self.eof_char != 0 {
            self.buf.extend_from_slice(&[self.eof_char]);
            tracing::debug!(eof_char = self.eof_char, "output eof marker appended");
        }
        self.flush()
    }

    /// 尚未交给写端的字节数。
    pub fn num_buffered_bytes(&self) -> usize {
        self.buf.len()
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 更换编码；旧编码器先被结束，其尾部字节留在缓冲中。
    pub fn set_encoding(&mut self, encoding: Option<TextEncoding>) {
        self.finish_encoder();
        self.encoding = encoding;
        self.encoder = new_encoder(encoding);
    }

    /// 更换换行模式，只影响之后的写入。
    pub fn set_translation(&mut self, translation: Translation) {
        self.translation = translation;
    }

    /// 更换关闭时追加的 EOF 字节，0 表示不追加。
    pub fn set_eof_char(&mut self, eof_char: u8) {
        self.eof_char = eof_char;
    }

    /// 更换缓冲策略。
    pub fn set_buffering(&mut self, buffering: Buffering) {
        self.buffering = buffering;
    }

    /// 更换缓冲区大小。
    pub fn set_buffer_size(&mut self, size: usize) {
        self.size = size;
    }

    /// 切换阻塞模式。
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
    }

    /// 是否为阻塞模式。
    pub fn blocking(&self) -> bool {
        self.blocking
    }

    /// 开启或关闭刷出后的强制同步。
    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    /// 把载荷按换行模式展开到 `self.text`，返回载荷中是否含换行。
    fn translate(&mut self, value: OutputValue<'_>) -> bool {
        let eol = self.translation.output_eol();
        self.text.clear();
        let mut newline = false;
        let mut push = |c: char, text: &mut String| {
            if c == '\n' {
                newline = true;
                text.extend(eol.iter().map(|b| char::from(*b)));
            } else {
                text.push(c);
            }
        };
        match value {
            OutputValue::Text(s) => s.chars().for_each(|c| push(c, &mut self.text)),
            OutputValue::Bytes(b) => b.iter().for_each(|byte| push(char::from(*byte), &mut self.text)),
        }
        newline
    }

    fn encode(&mut self, text: &str, last: bool) {
        let Some(enc) = self.encoding else {
            // 二进制：只保留低 8 位。
            self.buf.extend(text.chars().map(|c| c as u32 as u8));
            return;
        };
        if enc.is_latin1() {
            self.buf.extend(text.chars().map(latin1_byte));
            return;
        }
        if enc.is_utf16() {
            let big_endian = enc.is_utf16_be();
            for unit in text.encode_utf16() {
                let bytes = if big_endian {
                    unit.to_be_bytes()
                } else {
                    unit.to_le_bytes()
                };
                self.buf.extend_from_slice(&bytes);
            }
            return;
        }
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        let mut out = Vec::new();
        let mut rest = text;
        loop {
            let need = encoder
                .max_buffer_length_from_utf8_without_replacement(rest.len())
                .unwrap_or(rest.len().saturating_mul(4) + 16);
            out.reserve(need);
            let (result, read) =
                encoder.encode_from_utf8_to_vec_without_replacement(rest, &mut out, last);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => continue,
                EncoderResult::Unmappable(_) => out.push(b'?'),
            }
        }
        self.buf.extend_from_slice(&out);
    }

    fn finish_encoder(&mut self) {
        if self.encoder.is_some() {
            self.encode("", true);
            self.encoder = new_encoder(self.encoding);
        }
    }
}

fn new_encoder(encoding: Option<TextEncoding>) -> Option<encoding_rs::Encoder> {
    encoding.and_then(|enc| enc.new_encoder())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedSink {
        data: Arc<Mutex<Vec<u8>>>,
        syncs: Arc<Mutex<usize>>,
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl RawSink for SharedSink {
        fn sync_data(&mut self) -> io::Result<()> {
            *self.syncs.lock() += 1;
            Ok(())
        }
    }

    fn stage(encoding: &str, translation: Translation, buffering: Buffering) -> (OutputStage, SharedSink) {
        let sink = SharedSink::default();
        let encoding = TextEncoding::lookup(encoding).expect("lookup");
        let stage = OutputStage::new(Box::new(sink.clone()), encoding, translation, buffering, 16);
        (stage, sink)
    }

    #[test]
    fn translates_newlines_before_encoding() {
        let (mut out, sink) = stage("utf-8", Translation::Crlf, Buffering::None);
        out.write("a\nb".into()).expect("write");
        assert_eq!(&*sink.data.lock(), b"a\r\nb");
    }

    #[test]
    fn full_buffering_holds_until_size() {
        let (mut out, sink) = stage("utf-8", Translation::Lf, Buffering::Full);
        out.write("0123456789".into()).expect("write");
        assert_eq!(out.num_buffered_bytes(), 10);
        assert!(sink.data.lock().is_empty());
        out.write("abcdef".into()).expect("write");
        assert_eq!(out.num_buffered_bytes(), 0);
        assert_eq!(sink.data.lock().len(), 16);
    }

    #[test]
    fn line_buffering_flushes_on_newline() {
        let (mut out, sink) = stage("utf-8", Translation::Lf, Buffering::Line);
        out.write("ab".into()).expect("write");
        assert_eq!(out.num_buffered_bytes(), 2);
        out.write("c\n".into()).expect("write");
        assert_eq!(&*sink.data.lock(), b"abc\n");
    }

    #[test]
    fn unmappable_characters_become_question_marks() {
        let (mut out, sink) = stage("windows-1252", Translation::Lf, Buffering::None);
        out.write("é€你".into()).expect("write");
        assert_eq!(&*sink.data.lock(), &[0xE9, 0x80, b'?']);
    }

    #[test]
    fn latin1_maps_code_points_to_bytes() {
        let (mut out, sink) = stage("iso8859-1", Translation::Lf, Buffering::None);
        out.write("\u{80}\u{9f}é€".into()).expect("write");
        assert_eq!(&*sink.data.lock(), &[0x80, 0x9F, 0xE9, b'?']);
    }

    #[test]
    fn binary_keeps_low_byte() {
        let (mut out, sink) = stage("binary", Translation::Binary, Buffering::None);
        out.write((&[0x00u8, 0xFF, b'\n'][..]).into()).expect("write");
        assert_eq!(&*sink.data.lock(), &[0x00, 0xFF, b'\n']);
    }

    #[test]
    fn utf16_is_encoded_directly() {
        let (mut out, sink) = stage("utf-16be", Translation::Lf, Buffering::None);
        out.write("A".into()).expect("write");
        assert_eq!(&*sink.data.lock(), &[0x00, 0x41]);
    }

    #[test]
    fn close_appends_eof_once() {
        let (mut out, sink) = stage("utf-8", Translation::Lf, Buffering::Full);
        out.set_eof_char(0x1A);
        out.write("x".into()).expect("write");
        out.close().expect("close");
        out.close().expect("close again");
        assert_eq!(&*sink.data.lock(), b"x\x1a");
    }

    #[test]
    fn sync_runs_after_each_flush() {
        let (mut out, sink) = stage("utf-8", Translation::Lf, Buffering::None);
        out.set_sync(true);
        out.write("a".into()).expect("write");
        out.write("b".into()).expect("write");
        out.flush().expect("flush");
        assert_eq!(*sink.syncs.lock(), 2);
    }
}

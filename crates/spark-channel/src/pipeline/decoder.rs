use std::collections::VecDeque;
use std::io;

use encoding_rs::{CoderResult, Encoding};

use super::{ByteSource, CharSource, Lookahead, Progress};
use crate::encoding::TextEncoding;

/// 单次向上游请求的字节上限。
const MAX_CHUNK: usize = 16 * 1024;

/// BOM 最长 3 字节（UTF-8）。
const BOM_LOOKAHEAD: usize = 3;

const BOMS: [&[u8]; 3] = [&[0xEF, 0xBB, 0xBF], &[0xFF, 0xFE], &[0xFE, 0xFF]];

/// 字节到字符的解码阶段。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 调用方按“字符数”提出读取请求，而上游按字节交付；本阶段负责两者之间的换算，
///   并保证单次交出的字符不多于请求量。
///
/// ## 逻辑 (How)
/// - 有编码时由 `encoding_rs` 的流式解码器处理，跨读取边界的半个多字节序列留在解码器状态里；
/// - 无编码（二进制）或 Latin-1 时逐字节映射为 U+0000–U+00FF；
/// - 一次读取的字节数为 `max * bytes_per_char`，超出请求的字符（如流尾冲刷出的替换字符）
///   存入 `surplus`，下次优先交出；
/// - 流首若出现与配置编码一致的 BOM，借助上游的标记/回退能力探测并跳过，只做一次。
///
/// ## 契约 (What)
/// - 更换编码只影响之后的读取，`surplus` 中已解码的字符保持原样；
/// - 解码器在流结束时被冲刷，之后报告 `Eof`，直到 [`cancel_eof`](Self::cancel_eof)
///   或 [`seek_reset`](Self::seek_reset)。
pub struct Decoder<S> {
    inner: S,
    encoding: Option<TextEncoding>,
    state: Option<encoding_rs::Decoder>,
    surplus: VecDeque<char>,
    scratch: Vec<u8>,
    bom_pending: bool,
    finished: bool,
}

impl<S: Lookahead> Decoder<S> {
    /// `encoding` 为 `None` 表示二进制。
    pub fn new(inner: S, encoding: Option<TextEncoding>) -> Self {
        Self {
            inner,
            encoding,
            state: encoding.and_then(|enc| enc.new_decoder()),
            surplus: VecDeque::new(),
            scratch: Vec::new(),
            bom_pending: true,
            finished: false,
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

    /// 当前编码；`None` 表示二进制。
    pub fn encoding(&self) -> Option<TextEncoding> {
        self.encoding
    }

    /// 更换编码；解码状态重建，半个多字节序列随旧状态丢弃。
    pub fn set_encoding(&mut self, encoding: Option<TextEncoding>) {
        self.encoding = encoding;
        self.state = encoding.and_then(|enc| enc.new_decoder());
    }

    /// 撤销流结束状态；已冲刷的解码器随之重建。
    pub fn cancel_eof(&mut self) {
        if self.finished {
            self.finished = false;
            self.state = self.encoding.and_then(|enc| enc.new_decoder());
        }
    }

    /// 丢弃多余字符与解码状态。
    pub fn seek_reset(&mut self) {
        self.surplus.clear();
        self.finished = false;
        self.state = self.encoding.and_then(|enc| enc.new_decoder());
    }

    /// 定位回流首后重新启用 BOM 探测。
    pub fn rearm_bom_sniff(&mut self) {
        self.bom_pending = true;
    }

    /// 已有字节绕过本层被读走（例如按字节读取），此后不再是流首，取消 BOM 探测。
    pub fn disarm_bom_sniff(&mut self) {
        self.bom_pending = false;
    }

    /// 已解码、尚未交出的多余字符。
    pub fn surplus(&self) -> impl Iterator<Item = char> + '_ {
        self.surplus.iter().copied()
    }

    /// 取走已解码、尚未交出的多余字符。
    pub fn take_surplus(&mut self) -> String {
        self.surplus.drain(..).collect()
    }

    /// 探测并跳过 BOM。`WouldBlock` 表示字节尚不足以下结论。
    fn sniff_bom(&mut self) -> io::Result<Progress> {
        let Some(expected) = self.encoding.and_then(|enc| enc.bom_encoding()) else {
            self.bom_pending = false;
            return Ok(Progress::Ready(0));
        };
        self.inner.mark(BOM_LOOKAHEAD);
        let mut probe = [0u8; BOM_LOOKAHEAD];
        let mut got = 0;
        let mut blocked = false;
        while got < probe.len() {
            match self.inner.read_bytes(&mut probe[got..]) {
                Ok(Progress::Ready(n)) => got += n,
                Ok(Progress::Eof) => break,
                Ok(Progress::WouldBlock) => {
                    blocked = true;
                    break;
                }
                Err(err) => {
                    let _ = self.inner.reset();
                    return Err(err);
                }
            }
        }
        self.inner.reset()?;
        let found = Encoding::for_bom(&probe[..got]);
        if blocked && found.is_none() && could_be_bom_prefix(&probe[..got]) {
            return Ok(Progress::WouldBlock);
        }
        self.bom_pending = false;
        if let Some((bom_encoding, len)) = found {
            if bom_encoding == expected {
                let mut skip = [0u8; BOM_LOOKAHEAD];
                self.inner.read_bytes(&mut skip[..len])?;
            }
        }
        Ok(Progress::Ready(0))
    }

    fn serve_surplus(&mut self, out: &mut String, max: usize) -> usize {
        let n = self.surplus.len().min(max);
        out.extend(self.surplus.drain(..n));
        n
    }

    fn emit<I: Iterator<Item = char>>(&mut self, chars: I, out: &mut String, max: usize) -> usize {
        let mut produced = 0;
        for c in chars {
            if produced < max {
                out.push(c);
                produced += 1;
            } else {
                self.surplus.push_back(c);
            }
        }
        produced
    }

    fn decode(&mut self, src: &[u8], last: bool, out: &mut String, max: usize) -> usize {
        let Some(state) = self.state.as_mut() else {
            return 0;
        };
        let mut text = String::new();
        let mut rest = src;
        loop {
            let need = state
                .max_utf8_buffer_length(rest.len())
                .unwrap_or(rest.len().saturating_mul(3) + 16);
            text.reserve(need);
            let (result, read, _) = state.decode_to_string(rest, &mut text, last);
            rest = &rest[read..];
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        self.emit(text.chars(), out, max)
    }

    fn read_binary(&mut self, out: &mut String, max: usize) -> io::Result<Progress> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(max.min(MAX_CHUNK), 0);
        let progress = self.inner.read_bytes(&mut scratch);
        if let Ok(Progress::Ready(n)) = progress {
            out.extend(scratch[..n].iter().map(|byte| char::from(*byte)));
        }
        if let Ok(Progress::Eof) = progress {
            self.finished = true;
        }
        self.scratch = scratch;
        progress
    }

    fn read_text(&mut self, unit: usize, out: &mut String, max: usize) -> io::Result<Progress> {
        let want = max.saturating_mul(unit).clamp(unit, MAX_CHUNK);
        loop {
            let mut scratch = std::mem::take(&mut self.scratch);
            scratch.resize(want, 0);
            let outcome = match self.inner.read_bytes(&mut scratch) {
                Ok(Progress::Ready(n)) => {
                    let produced = self.decode(&scratch[..n], false, out, max);
                    // 只凑到半个多字节序列时继续读。
                    (produced > 0).then_some(Ok(Progress::Ready(produced)))
                }
                Ok(Progress::Eof) => {
                    let produced = self.decode(&[], true, out, max);
                    self.finished = true;
                    Some(Ok(if produced > 0 {
                        Progress::Ready(produced)
                    } else {
                        Progress::Eof
                    }))
                }
                Ok(Progress::WouldBlock) => Some(Ok(Progress::WouldBlock)),
                Err(err) => Some(Err(err)),
            };
            self.scratch = scratch;
            if let Some(result) = outcome {
                return result;
            }
        }
    }
}

fn could_be_bom_prefix(bytes: &[u8]) -> bool {
    BOMS.iter()
        .any(|bom| bom.len() > bytes.len() && bom.starts_with(bytes))
}

impl<S: Lookahead> CharSource for Decoder<S> {
    fn read_chars(&mut self, out: &mut String, max: usize) -> io::Result<Progress> {
        if max == 0 {
            return Ok(Progress::Ready(0));
        }
        if !self.surplus.is_empty() {
            return Ok(Progress::Ready(self.serve_surplus(out, max)));
        }
        if self.finished {
            return Ok(Progress::Eof);
        }
        if self.bom_pending {
            if let Progress::WouldBlock = self.sniff_bom()? {
                return Ok(Progress::WouldBlock);
            }
        }
        match self.encoding {
            Some(enc) if !enc.is_latin1() => self.read_text(enc.bytes_per_char(), out, max),
            _ => self.read_binary(out, max),
        }
    }

    fn available(&self) -> usize {
        self.surplus.len() + self.inner.available()
    }
}

use std::collections::VecDeque;
use std::io;

use super::{CharSource, Progress};
use crate::config::Translation;

/// [`EolFilter::read_line`] 的结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineRead {
    /// 一整行，行终止符已去除；流尾未终止的最后一行也以此返回。
    Line(String),
    /// 非阻塞模式下暂无更多字符，已读到的部分行保留在过滤器内。
    Blocked,
    /// 流已结束且没有剩余字符。
    Eof,
}

enum Next {
    Char(char),
    WouldBlock,
    Eof,
}

/// 行终止符转换阶段：把输入侧的各种换行统一为 `\n`。
///
/// # 行为概览
/// - `Lf`/`Binary`：原样透传；
/// - `Cr`：`\r` 转为 `\n`；
/// - `Crlf`：`\r\n` 折叠为 `\n`，孤立的 `\r` 原样保留；
/// - `Auto`：在首次遇到 `\n`、`\r` 或 `\r\n` 时识别换行风格并锁定；
/// - `Platform`：按本机换行风格处理。
///
/// 判定 `\r` 需要看下一个字符；非阻塞读取恰好停在 `\r` 之后时，
/// `\r` 被退回预读队列，等下一次读取再决定。
pub struct EolFilter<D> {
    inner: D,
    translation: Translation,
    detected: Option<Translation>,
    lookahead: VecDeque<char>,
    line: String,
    chunk: String,
    eof: bool,
}

impl<D: CharSource> EolFilter<D> {
    /// 以 `translation` 模式包装字符上游。
    pub fn new(inner: D, translation: Translation) -> Self {
        Self {
            inner,
            translation,
            detected: None,
            lookahead: VecDeque::new(),
            line: String::new(),
            chunk: String::new(),
            eof: false,
        }
    }

    /// 上游阶段。
    pub fn get_ref(&self) -> &D {
        &self.inner
    }

    /// 上游阶段的可变引用。
    pub fn get_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// 当前转换模式。
    pub fn translation(&self) -> Translation {
        self.translation
    }

    /// 更换转换模式，`Auto` 的识别结果随之作废。
    pub fn set_translation(&mut self, translation: Translation) {
        self.translation = translation;
        self.detected = None;
    }

    /// 上游已结束且本层没有剩余字符。
    pub fn eof_seen(&self) -> bool {
        self.eof && self.lookahead.is_empty() && self.line.is_empty()
    }

    /// 撤销流结束状态。
    pub fn cancel_eof(&mut self) {
        self.eof = false;
    }

    /// 本层尚未交出的字符：被中断的部分行在前，预读字符在后。
    pub fn pending(&self) -> impl Iterator<Item = char> + '_ {
        self.line.chars().chain(self.lookahead.iter().copied())
    }

    /// 取走本层尚未交出的字符，至多 `max` 个：被中断的部分行在前，预读字符在后。
    ///
    /// 超出 `max` 的部分留作部分行，下次读取时先交出。
    pub fn take_pending(&mut self, max: usize) -> String {
        let mut pending = std::mem::take(&mut self.line);
        pending.extend(self.lookahead.drain(..));
        let cut = pending
            .char_indices()
            .nth(max)
            .map_or(pending.len(), |(at, _)| at);
        self.line = pending.split_off(cut);
        pending
    }

    /// 丢弃部分行与预读字符，`Auto` 重新识别。
    pub fn seek_reset(&mut self) {
        self.lookahead.clear();
        self.line.clear();
        self.eof = false;
        self.detected = None;
    }

    /// 读取一行。`blocking` 为真时，上游的 `WouldBlock` 会被重试而不是返回 `Blocked`。
    pub fn read_line(&mut self, blocking: bool) -> io::Result<LineRead> {
        loop {
            // 逐字符向上游取，行终止符之后的内容留在字节层。
            match self.next_translated(1)? {
                Next::Char('\n') => return Ok(LineRead::Line(std::mem::take(&mut self.line))),
                Next::Char(c) => self.line.push(c),
                Next::WouldBlock if blocking => std::thread::yield_now(),
                Next::WouldBlock => return Ok(LineRead::Blocked),
                Next::Eof if self.line.is_empty() => return Ok(LineRead::Eof),
                Next::Eof => return Ok(LineRead::Line(std::mem::take(&mut self.line))),
            }
        }
    }

    fn mode(&self) -> Translation {
        match self.translation {
            Translation::Platform => Translation::native(),
            Translation::Auto => self.detected.unwrap_or(Translation::Auto),
            other => other,
        }
    }

    fn fill(&mut self, want: usize) -> io::Result<Progress> {
        if self.eof {
            return Ok(Progress::Eof);
        }
        self.chunk.clear();
        let progress = self.inner.read_chars(&mut self.chunk, want.max(1))?;
        match progress {
            Progress::Ready(_) => self.lookahead.extend(self.chunk.chars()),
            Progress::Eof => self.eof = true,
            Progress::WouldBlock => {}
        }
        Ok(progress)
    }

    fn next_raw(&mut self, want: usize) -> io::Result<Next> {
        if self.lookahead.is_empty() {
            match self.fill(want)? {
                Progress::Ready(_) => {}
                Progress::WouldBlock => return Ok(Next::WouldBlock),
                Progress::Eof => return Ok(Next::Eof),
            }
        }
        Ok(self.lookahead.pop_front().map_or(Next::Eof, Next::Char))
    }

    fn peek_raw(&mut self) -> io::Result<Next> {
        if self.lookahead.is_empty() {
            match self.fill(1)? {
                Progress::Ready(_) => {}
                Progress::WouldBlock => return Ok(Next::WouldBlock),
                Progress::Eof => return Ok(Next::Eof),
            }
        }
        Ok(self.lookahead.front().map_or(Next::Eof, |c| Next::Char(*c)))
    }

    fn next_translated(&mut self, want: usize) -> io::Result<Next> {
        let c = match self.next_raw(want)? {
            Next::Char(c) => c,
            other => return Ok(other),
        };
        let mode = self.mode();
        let translated = match (mode, c) {
            (Translation::Cr, '\r') => '\n',
            (Translation::Crlf, '\r') => match self.peek_raw()? {
                Next::Char('\n') => {
                    self.lookahead.pop_front();
                    '\n'
                }
                Next::WouldBlock => {
                    self.lookahead.push_front('\r');
                    return Ok(Next::WouldBlock);
                }
                Next::Char(_) | Next::Eof => '\r',
            },
            (Translation::Auto, '\n') => {
                self.detected = Some(Translation::Lf);
                '\n'
            }
            (Translation::Auto, '\r') => match self.peek_raw()? {
                Next::Char('\n') => {
                    self.lookahead.pop_front();
                    self.detected = Some(Translation::Crlf);
                    '\n'
                }
                Next::WouldBlock => {
                    self.lookahead.push_front('\r');
                    return Ok(Next::WouldBlock);
                }
                Next::Char(_) | Next::Eof => {
                    self.detected = Some(Translation::Cr);
                    '\n'
                }
            },
            (_, c) => c,
        };
        Ok(Next::Char(translated))
    }
}

impl<D: CharSource> CharSource for EolFilter<D> {
    fn read_chars(&mut self, out: &mut String, max: usize) -> io::Result<Progress> {
        if max == 0 {
            return Ok(Progress::Ready(0));
        }
        let mut n = 0;
        // 被中断的行读取留下的部分行先交出。
        if !self.line.is_empty() {
            let take = self
                .line
                .char_indices()
                .nth(max)
                .map_or(self.line.len(), |(at, _)| at);
            let rest = self.line.split_off(take);
            n = self.line.chars().count();
            out.push_str(&self.line);
            self.line = rest;
        }
        while n < max {
            if n > 0 && self.lookahead.is_empty() {
                break;
            }
            match self.next_translated(max - n)? {
                Next::Char(c) => {
                    out.push(c);
                    n += 1;
                }
                Next::WouldBlock if n == 0 => return Ok(Progress::WouldBlock),
                Next::Eof if n == 0 => return Ok(Progress::Eof),
                Next::WouldBlock | Next::Eof => break,
            }
        }
        Ok(Progress::Ready(n))
    }

    fn available(&self) -> usize {
        self.line.chars().count() + self.lookahead.len() + self.inner.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 按预设片段交出字符的上游；`None` 表示一次 `WouldBlock`。
    struct ScriptedChars {
        steps: VecDeque<Option<&'static str>>,
    }

    impl ScriptedChars {
        fn new(steps: Vec<Option<&'static str>>) -> Self {
            Self {
                steps: steps.into(),
            }
        }
    }

    impl CharSource for ScriptedChars {
        fn read_chars(&mut self, out: &mut String, max: usize) -> io::Result<Progress> {
            match self.steps.pop_front() {
                None => Ok(Progress::Eof),
                Some(None) => Ok(Progress::WouldBlock),
                Some(Some(text)) => {
                    let cut = text.char_indices().nth(max).map_or(text.len(), |(at, _)| at);
                    out.push_str(&text[..cut]);
                    if cut < text.len() {
                        self.steps.push_front(Some(&text[cut..]));
                    }
                    Ok(Progress::Ready(text[..cut].chars().count()))
                }
            }
        }
    }

    fn filter(steps: Vec<Option<&'static str>>, translation: Translation) -> EolFilter<ScriptedChars> {
        EolFilter::new(ScriptedChars::new(steps), translation)
    }

    fn drain(filter: &mut EolFilter<ScriptedChars>) -> String {
        let mut out = String::new();
        while let Progress::Ready(_) = filter.read_chars(&mut out, 64).expect("read") {}
        out
    }

    #[test]
    fn crlf_collapses_pairs_only() {
        let mut eol = filter(vec![Some("a\r\nb\rc")], Translation::Crlf);
        assert_eq!(drain(&mut eol), "a\nb\rc");
    }

    #[test]
    fn cr_maps_every_carriage_return() {
        let mut eol = filter(vec![Some("a\rb\r")], Translation::Cr);
        assert_eq!(drain(&mut eol), "a\nb\n");
    }

    #[test]
    fn auto_locks_to_first_style() {
        let mut eol = filter(vec![Some("a\r\nb\rc\nd")], Translation::Auto);
        assert_eq!(drain(&mut eol), "a\nb\rc\nd");
        let mut eol = filter(vec![Some("a\rb\r\n")], Translation::Auto);
        assert_eq!(drain(&mut eol), "a\nb\n\n");
    }

    #[test]
    fn binary_is_identity() {
        let mut eol = filter(vec![Some("a\r\nb")], Translation::Binary);
        assert_eq!(drain(&mut eol), "a\r\nb");
    }

    #[test]
    fn carriage_return_held_across_would_block() {
        let mut eol = filter(vec![Some("\r"), None, Some("\n")], Translation::Crlf);
        let mut out = String::new();
        assert_eq!(eol.read_chars(&mut out, 8).expect("read"), Progress::WouldBlock);
        assert!(out.is_empty());
        assert_eq!(eol.read_chars(&mut out, 8).expect("read"), Progress::Ready(1));
        assert_eq!(out, "\n");
    }

    #[test]
    fn read_line_strips_terminator_and_returns_final_line_once() {
        let mut eol = filter(vec![Some("one\r\ntwo")], Translation::Auto);
        assert_eq!(eol.read_line(true).expect("line"), LineRead::Line("one".into()));
        assert_eq!(eol.read_line(true).expect("line"), LineRead::Line("two".into()));
        assert!(eol.eof_seen());
        assert_eq!(eol.read_line(true).expect("line"), LineRead::Eof);
    }

    #[test]
    fn partial_line_survives_blocked_read() {
        let mut eol = filter(vec![Some("par"), None, Some("tial\n")], Translation::Lf);
        assert_eq!(eol.read_line(false).expect("line"), LineRead::Blocked);
        assert!(!eol.eof_seen());
        assert_eq!(eol.read_line(false).expect("line"), LineRead::Line("partial".into()));
    }

    #[test]
    fn seek_reset_forgets_detection_and_lookahead() {
        let mut eol = filter(vec![Some("a\rb")], Translation::Auto);
        let mut out = String::new();
        eol.read_chars(&mut out, 1).expect("read");
        eol.seek_reset();
        assert_eq!(eol.available(), 0);
        assert!(!eol.eof_seen());
    }
}

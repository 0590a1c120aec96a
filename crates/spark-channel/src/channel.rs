//! 通道编排：惰性构建过滤链、分派读写、下推配置。
//!
//! # 教案式说明
//!
//! ## 意图（Why）
//! - 脚本层对所有传输使用同一套读写与配置接口，差异全部由 [`Transport`] 钩子和过滤链吸收；
//! - 很多通道只读或只写，过滤链按方向在首次使用时构建，未使用的方向不付出任何代价。
//!
//! ## 逻辑（How）
//! - 输入链：`原始读端 → EofFilter → InputBuffer → Markable → Decoder → EolFilter`；
//! - 输出阶段：`write → OutputStage → 原始写端`；
//! - 每个方向是一个 `Unbuilt/Built` 状态，setter 在未构建时只记录配置，构建后同时推入活动阶段。
//!
//! ## 契约（What）
//! - 未配置编码即为二进制：按字节读取，跳过解码与换行转换；
//! - 读取返回 [`ReadStatus::Eof`]（码值 `-1`）表示流结束，从不以错误表示；
//! - 非阻塞读取可以返回 `Data(0)`；非阻塞写入直接失败。
//!
//! ## 注意事项（Trade-offs）
//! - 通道自身不加锁，假定单一所有者顺序调用；多所有者场景使用 [`SharedChannel`](crate::SharedChannel)。

use core::fmt;
use std::io::{self, SeekFrom};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{
    Buffering, ChannelOptions, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE, OpenMode,
    Translation,
};
use crate::encoding::{TextEncoding, encode_chars};
use crate::error::{ChannelError, Result};
use crate::pipeline::{
    ByteSource, CharSource, Decoder, EofFilter, EolFilter, InputBuffer, InputChain, LineRead,
    Markable, OutputStage, OutputValue, PipelineState, Progress,
};
use crate::transport::Transport;

/// 单次向过滤链请求的单位上限。
const READ_CHUNK: usize = 8192;

/// 读取方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadKind {
    /// 读到流结束。
    All,
    /// 至多读取 `n` 个单位（二进制为字节，文本为字符）。
    Bytes(usize),
    /// 读取一行，不含行终止符。
    Line,
}

/// 一次读取的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// 读到的单位数；非阻塞读取暂无数据时为 0。
    Data(usize),
    /// 流结束且本次没有读到任何内容。
    Eof,
}

impl ReadStatus {
    /// 脚本层码值：`Eof` 为 `-1`，否则为读到的单位数。
    pub fn code(self) -> i64 {
        match self {
            ReadStatus::Data(n) => n as i64,
            ReadStatus::Eof => -1,
        }
    }
}

/// 读取目的地：文本或字节。
///
/// 变体与通道模式不一致时按 U+0000–U+00FF 与字节一一对应的规则就地转换。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelData {
    /// 文本。
    Text(String),
    /// 字节。
    Bytes(Vec<u8>),
}

impl Default for ChannelData {
    fn default() -> Self {
        ChannelData::Text(String::new())
    }
}

impl ChannelData {
    /// 文本内容；字节变体返回 `None`。
    pub fn text(&self) -> Option<&str> {
        match self {
            ChannelData::Text(text) => Some(text),
            ChannelData::Bytes(_) => None,
        }
    }

    /// 字节内容；文本变体返回 `None`。
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            ChannelData::Text(_) => None,
            ChannelData::Bytes(bytes) => Some(bytes),
        }
    }

    /// 单位数：文本按字符，字节按字节。
    pub fn len(&self) -> usize {
        match self {
            ChannelData::Text(text) => text.chars().count(),
            ChannelData::Bytes(bytes) => bytes.len(),
        }
    }

    /// 是否没有任何内容。
    pub fn is_empty(&self) -> bool {
        match self {
            ChannelData::Text(text) => text.is_empty(),
            ChannelData::Bytes(bytes) => bytes.is_empty(),
        }
    }

    /// 以文本视图取得可变引用，必要时把字节按 Latin-1 转为字符。
    pub fn text_mut(&mut self) -> &mut String {
        if let ChannelData::Bytes(bytes) = self {
            let text = bytes.iter().map(|b| char::from(*b)).collect();
            *self = ChannelData::Text(text);
        }
        match self {
            ChannelData::Text(text) => text,
            ChannelData::Bytes(_) => unreachable!("converted to text above"),
        }
    }

    /// 以字节视图取得可变引用，必要时取每个字符的低 8 位。
    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        if let ChannelData::Text(text) = self {
            let bytes = text.chars().map(|c| c as u32 as u8).collect();
            *self = ChannelData::Bytes(bytes);
        }
        match self {
            ChannelData::Bytes(bytes) => bytes,
            ChannelData::Text(_) => unreachable!("converted to bytes above"),
        }
    }
}

/// 统一 I/O 通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在任意 [`Transport`] 之上提供缓冲读取、按行读取、换行转换、编码转换、
///   自定义 EOF 标记与阻塞/非阻塞语义。
///
/// ## 逻辑（How）
/// - 首次读取时调用 [`Transport::raw_input`] 构建输入链，首次写入时调用
///   [`Transport::raw_output`] 构建输出阶段，各自只构建一次；
/// - 配置 setter 先写入通道字段，方向已构建时再推入对应阶段；
/// - 与方向无关的 setter（例如只写通道上的输入换行模式）直接忽略。
///
/// ## 契约（What）
/// - 名称只能设置一次；引用计数为原子量，最后一个所有者负责关闭；
/// - `eof()` 只在确认流结束后为真，`seek_reset` 与更换输入 EOF 标记会清除它；
/// - 关闭后所有读写返回 [`ChannelError::Closed`]。
pub struct Channel<T: Transport> {
    transport: T,
    mode: OpenMode,
    name: OnceLock<String>,
    ref_count: AtomicUsize,
    blocking: bool,
    buffering: Buffering,
    buffer_size: usize,
    encoding: Option<TextEncoding>,
    input_translation: Translation,
    output_translation: Translation,
    input_eof_char: u8,
    output_eof_char: u8,
    eof_seen: bool,
    closed: bool,
    input: PipelineState<InputChain>,
    output: PipelineState<OutputStage>,
}

impl<T: Transport> Channel<T> {
    /// 以默认配置（UTF-8、全缓冲、输入 `auto`、输出 `platform`）打开通道。
    pub fn new(transport: T, mode: OpenMode) -> Self {
        Self {
            transport,
            mode,
            name: OnceLock::new(),
            ref_count: AtomicUsize::new(0),
            blocking: true,
            buffering: Buffering::Full,
            buffer_size: DEFAULT_BUFFER_SIZE,
            encoding: Some(TextEncoding::utf8()),
            input_translation: Translation::Auto,
            output_translation: Translation::Platform,
            input_eof_char: 0,
            output_eof_char: 0,
            eof_seen: false,
            closed: false,
            input: PipelineState::Unbuilt,
            output: PipelineState::Unbuilt,
        }
    }

    /// 打开通道并经普通 setter 应用 `options`，任一项被拒绝即返回错误。
    pub fn with_options(transport: T, mode: OpenMode, options: &ChannelOptions) -> Result<Self> {
        let mut channel = Self::new(transport, mode);
        channel.set_encoding(options.encoding.as_deref())?;
        channel.set_buffer_size(options.buffer_size)?;
        channel.set_buffering(options.buffering);
        channel.set_blocking(options.blocking);
        channel.set_input_translation(options.input_translation);
        channel.set_output_translation(options.output_translation);
        channel.set_input_eof_char(options.input_eof_char);
        channel.set_output_eof_char(options.output_eof_char);
        Ok(channel)
    }

    /// 底层传输。
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 底层传输的可变引用。
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ---- 读取 ----

    /// 按 `kind` 读取并追加到 `dst`。
    ///
    /// # 契约（What）
    /// - 已观察到流结束时立即返回 [`ReadStatus::Eof`]；
    /// - `Bytes(n)` 以不超过 8192 的块循环读取，满足请求、遇到流结束或非阻塞下无进展时停止；
    /// - `Line` 去除行终止符；流尾未终止的最后一行返回一次，下一次返回 `Eof`；
    /// - 非阻塞下行不完整时返回 `Data(0)`，部分行留在过滤链中。
    pub fn read(&mut self, dst: &mut ChannelData, kind: ReadKind) -> Result<ReadStatus> {
        self.check_read()?;
        if self.eof_seen {
            return Ok(ReadStatus::Eof);
        }
        if self.mode.is_writable() {
            if let Some(output) = self.output.live_mut() {
                output.flush()?;
            }
        }
        self.init_input()?;
        let binary = self.encoding.is_none();
        let blocking = self.blocking;
        let label = self.label();
        let chain = self.input.live_mut().ok_or_else(|| {
            ChannelError::Invariant(format!(
                "input pipeline of \"{label}\" is not wired after initialisation"
            ))
        })?;
        let status = match kind {
            ReadKind::Line => {
                let status = read_line(chain, dst, binary, blocking)?;
                self.eof_seen = match status {
                    ReadStatus::Eof => true,
                    ReadStatus::Data(_) => chain.eof_seen(),
                };
                status
            }
            ReadKind::All => read_units(chain, dst, binary, usize::MAX, &mut self.eof_seen)?,
            ReadKind::Bytes(n) => read_units(chain, dst, binary, n, &mut self.eof_seen)?,
        };
        tracing::trace!(channel = %label, ?kind, code = status.code(), "channel read");
        Ok(status)
    }

    /// 最近一次读取是否因暂无数据而不足。
    pub fn is_blocked(&self) -> Result<bool> {
        self.check_read()?;
        Ok(self
            .input
            .live()
            .is_some_and(|chain| chain.get_ref().get_ref().get_ref().last_read_would_block()))
    }

    // ---- 写入 ----

    /// 写入一段文本或字节。
    pub fn write<'a>(&mut self, value: impl Into<OutputValue<'a>>) -> Result<()> {
        self.check_write()?;
        if self.mode.contains(OpenMode::APPEND) {
            // 走完整的定位流程：先刷出、再重置输入链。
            if let Err(err) = self.seek(SeekFrom::End(0)) {
                tracing::debug!(channel = %self.label(), error = %err, "append seek failed, writing at current position");
            }
        }
        self.init_output()?;
        let output = self.output_stage()?;
        output.write(value.into())?;
        Ok(())
    }

    /// 刷出输出缓冲；输出阶段未构建时无操作。
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_writable() {
            return Err(ChannelError::NotWritable {
                channel: self.label(),
            });
        }
        if let Some(output) = self.output.live_mut() {
            output.flush()?;
        }
        Ok(())
    }

    // ---- 关闭 ----

    /// 拆除两个方向的过滤链并关闭传输。
    ///
    /// 即使某一步失败，其余步骤仍会执行，返回遇到的第一个错误。重复关闭无效果。
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let label = self.label();
        let mut first: Option<ChannelError> = None;

        if self.input.take().is_some() {
            tracing::debug!(channel = %label, "input pipeline released");
        }
        if self.mode.is_writable() && self.output_eof_char != 0 && !self.output.is_built() {
            if let Err(err) = self.init_output() {
                first.get_or_insert(err);
            }
        }
        if let Some(mut output) = self.output.take() {
            if let Err(err) = output.close() {
                first.get_or_insert(err.into());
            }
            tracing::debug!(channel = %label, "output stage released");
        }
        if let Err(err) = self.transport.close() {
            first.get_or_insert(err.into());
        }
        tracing::debug!(channel = %label, kind = %self.transport.kind(), "channel closed");
        first.map_or(Ok(()), Err)
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ---- 定位 ----

    /// 刷出输出、定位传输并重置输入链，返回新的绝对位置。
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        if let Some(output) = self.output.live_mut() {
            output.flush()?;
        }
        let pos = match pos {
            SeekFrom::Current(delta) => {
                SeekFrom::Current(delta - self.input_backlog() as i64)
            }
            other => other,
        };
        let target = self
            .transport
            .seek(pos)
            .map_err(|err| self.unsupported("seek", err))?;
        self.seek_reset();
        if target == 0 {
            if let Some(chain) = self.input.live_mut() {
                chain.get_mut().rearm_bom_sniff();
            }
        }
        tracing::debug!(channel = %self.label(), position = target, "seek reset the input pipeline");
        Ok(target)
    }

    /// 丢弃输入链中所有缓存与预读状态，并清除 `eof`。
    pub fn seek_reset(&mut self) {
        if let Some(eol) = self.input.live_mut() {
            eol.seek_reset();
            let decoder = eol.get_mut();
            decoder.seek_reset();
            let markable = decoder.get_mut();
            markable.seek_reset();
            let buffer = markable.get_mut();
            buffer.seek_reset();
            buffer.get_mut().seek_reset();
        }
        self.eof_seen = false;
    }

    /// 逻辑位置；传输没有位置概念时为 `-1`。
    pub fn tell(&mut self) -> Result<i64> {
        self.check_open()?;
        let position = match self.transport.tell() {
            Ok(Some(position)) => position,
            Ok(None) => return Ok(-1),
            Err(err) => return Err(self.unsupported("tell", err)),
        };
        let output = self.num_buffered_output_bytes();
        Ok(position as i64 - self.input_backlog() as i64 + output as i64)
    }

    // ---- 配置 ----

    /// 当前编码名；二进制为 `None`。
    pub fn encoding(&self) -> Option<&'static str> {
        self.encoding.map(|enc| enc.name())
    }

    /// 更换编码；`None`、`"binary"`、`"identity"` 表示二进制。未知名称被拒绝，原编码保留。
    pub fn set_encoding(&mut self, name: Option<&str>) -> Result<()> {
        let encoding = match name {
            None => None,
            Some(name) => TextEncoding::lookup(name)?,
        };
        self.encoding = encoding;
        if let Some(eol) = self.input.live_mut() {
            eol.get_mut().set_encoding(encoding);
        }
        if let Some(output) = self.output.live_mut() {
            output.set_encoding(encoding);
        }
        Ok(())
    }

    /// 每个字符至少占用的字节数；二进制为 1。
    pub fn bytes_per_char(&self) -> usize {
        self.encoding.map_or(1, |enc| enc.bytes_per_char())
    }

    /// 输入侧换行模式。
    pub fn input_translation(&self) -> Translation {
        self.input_translation
    }

    /// 更换输入侧换行模式；只写通道上忽略。
    pub fn set_input_translation(&mut self, translation: Translation) {
        if !self.mode.is_readable() {
            return;
        }
        self.input_translation = translation;
        if let Some(eol) = self.input.live_mut() {
            eol.set_translation(translation);
        }
    }

    /// 输出侧换行模式。
    pub fn output_translation(&self) -> Translation {
        self.output_translation
    }

    /// 更换输出侧换行模式；只读通道上忽略。
    pub fn set_output_translation(&mut self, translation: Translation) {
        if !self.mode.is_writable() {
            return;
        }
        self.output_translation = translation;
        if let Some(output) = self.output.live_mut() {
            output.set_translation(translation);
        }
    }

    /// 输入 EOF 标记，0 表示未启用。
    pub fn input_eof_char(&self) -> u8 {
        self.input_eof_char
    }

    /// 更换输入 EOF 标记。
    ///
    /// 链中所有尚未交出的内容按流中顺序退回 EOF 过滤器重新扫描：
    /// 换行过滤器的部分行与预读字符、解码余量（按当前编码还原为字节）、
    /// 标记层的重放字节、缓冲阶段的缓存。各阶段撤销流结束状态，`eof` 随之清除。
    pub fn set_input_eof_char(&mut self, eof_char: u8) {
        if !self.mode.is_readable() || eof_char == self.input_eof_char {
            return;
        }
        self.input_eof_char = eof_char;
        let encoding = self.encoding;
        if let Some(eol) = self.input.live_mut() {
            let mut decoded = eol.take_pending(usize::MAX);
            eol.cancel_eof();
            let decoder = eol.get_mut();
            decoded.push_str(&decoder.take_surplus());
            decoder.cancel_eof();
            let markable = decoder.get_mut();
            let replay = markable.take_replay();
            let buffer = markable.get_mut();
            let cached = buffer.take_cached();
            buffer.cancel_eof();

            let mut rescan = encode_chars(encoding, &decoded);
            rescan.extend_from_slice(&replay);
            rescan.extend_from_slice(&cached);
            let filter = buffer.get_mut();
            filter.set_eof_char(eof_char);
            filter.unread(&rescan);
        }
        self.eof_seen = false;
    }

    /// 输出 EOF 标记，0 表示未启用。
    pub fn output_eof_char(&self) -> u8 {
        self.output_eof_char
    }

    /// 更换关闭时追加的输出 EOF 标记；只读通道上忽略。
    pub fn set_output_eof_char(&mut self, eof_char: u8) {
        if !self.mode.is_writable() {
            return;
        }
        self.output_eof_char = eof_char;
        if let Some(output) = self.output.live_mut() {
            output.set_eof_char(eof_char);
        }
    }

    /// 是否为阻塞模式。
    pub fn blocking(&self) -> bool {
        self.blocking
    }

    /// 切换阻塞模式，已构建的阶段同步切换。
    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
        if let Some(eol) = self.input.live_mut() {
            eol.get_mut().get_mut().get_mut().set_blocking_mode(blocking);
        }
        if let Some(output) = self.output.live_mut() {
            output.set_blocking(blocking);
        }
    }

    /// 当前缓冲策略。
    pub fn buffering(&self) -> Buffering {
        self.buffering
    }

    /// 更换缓冲策略；已构建的阶段在下一次读写时即按新策略工作。
    pub fn set_buffering(&mut self, buffering: Buffering) {
        self.buffering = buffering;
        if let Some(eol) = self.input.live_mut() {
            eol.get_mut().get_mut().get_mut().set_buffering(buffering);
        }
        if let Some(output) = self.output.live_mut() {
            output.set_buffering(buffering);
        }
    }

    /// 当前缓冲区大小（字节）。
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// 更换缓冲区大小；不在 `[1, 1 MiB]` 内时拒绝，原大小保留。
    pub fn set_buffer_size(&mut self, size: usize) -> Result<()> {
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
            return Err(ChannelError::InvalidBufferSize {
                requested: size,
                max: MAX_BUFFER_SIZE,
            });
        }
        self.buffer_size = size;
        if let Some(eol) = self.input.live_mut() {
            eol.get_mut().get_mut().get_mut().set_buffer_size(size);
        }
        if let Some(output) = self.output.live_mut() {
            output.set_buffer_size(size);
        }
        Ok(())
    }

    // ---- 查询 ----

    /// 是否已确认流结束。
    pub fn eof(&self) -> bool {
        self.eof_seen
    }

    /// 打开时的访问模式。
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// 是否以只读方式打开。
    pub fn is_read_only(&self) -> bool {
        self.mode.contains(OpenMode::RDONLY)
    }

    /// 是否以只写方式打开。
    pub fn is_write_only(&self) -> bool {
        self.mode.contains(OpenMode::WRONLY)
    }

    /// 是否以读写方式打开。
    pub fn is_read_write(&self) -> bool {
        self.mode.contains(OpenMode::RDWR)
    }

    /// 是否允许读取。
    pub fn is_readable(&self) -> bool {
        self.mode.is_readable()
    }

    /// 是否允许写入。
    pub fn is_writable(&self) -> bool {
        self.mode.is_writable()
    }

    /// 是否为追加写。
    pub fn is_append(&self) -> bool {
        self.mode.contains(OpenMode::APPEND)
    }

    /// 输入侧已缓存、尚未交出的单位数（含换行过滤器中的部分行与预读字符）；
    /// EOF 过滤器吞下了哨兵时再加 1。
    pub fn num_buffered_input_bytes(&self) -> usize {
        self.input.live().map_or(0, |eol| {
            let filter = eol.get_ref().get_ref().get_ref().get_ref();
            eol.available() + usize::from(filter.saw_eof_char())
        })
    }

    /// 输出侧尚未交给写端的字节数。
    pub fn num_buffered_output_bytes(&self) -> usize {
        self.output.live().map_or(0, OutputStage::num_buffered_bytes)
    }

    // ---- 名称与引用计数 ----

    /// 通道名；尚未设置时为 `None`。
    pub fn name(&self) -> Option<&str> {
        self.name.get().map(String::as_str)
    }

    /// 设置通道名，只能设置一次。
    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.name.set(name).map_err(|rejected| {
            ChannelError::Invariant(format!(
                "channel name already set, refusing \"{rejected}\""
            ))
        })
    }

    /// 当前所有者数。
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// 增加一个所有者，返回新的计数。
    pub fn retain(&self) -> usize {
        self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 减少一个所有者，返回新的计数；计数为 0 时保持为 0。
    pub fn release(&self) -> usize {
        match self
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    // ---- 内部 ----

    fn label(&self) -> String {
        match self.name.get() {
            Some(name) => name.clone(),
            None => self.transport.kind().name().to_owned(),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ChannelError::Closed {
                channel: self.label(),
            });
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_readable() {
            return Err(ChannelError::NotReadable {
                channel: self.label(),
            });
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        self.check_open()?;
        if !self.mode.is_writable() {
            return Err(ChannelError::NotWritable {
                channel: self.label(),
            });
        }
        if !self.blocking {
            return Err(ChannelError::NonBlockingWrite {
                channel: self.label(),
            });
        }
        Ok(())
    }

    fn unsupported(&self, op: &'static str, err: io::Error) -> ChannelError {
        if err.kind() == io::ErrorKind::Unsupported {
            ChannelError::Unsupported {
                channel: self.label(),
                op,
            }
        } else {
            err.into()
        }
    }

    fn init_input(&mut self) -> Result<()> {
        if self.input.is_built() {
            return Ok(());
        }
        let raw = self.transport.raw_input()?;
        let filter = EofFilter::new(raw, self.input_eof_char);
        let mut buffer = InputBuffer::new(filter, self.buffer_size, self.buffering);
        buffer.set_blocking_mode(self.blocking);
        let decoder = Decoder::new(Markable::new(buffer), self.encoding);
        self.input = PipelineState::Built(EolFilter::new(decoder, self.input_translation));
        tracing::debug!(
            channel = %self.label(),
            kind = %self.transport.kind(),
            buffering = %self.buffering,
            buffer_size = self.buffer_size,
            "input pipeline built"
        );
        Ok(())
    }

    fn init_output(&mut self) -> Result<()> {
        if self.output.is_built() {
            return Ok(());
        }
        let sink = self.transport.raw_output()?;
        let mut stage = OutputStage::new(
            sink,
            self.encoding,
            self.output_translation,
            self.buffering,
            self.buffer_size,
        );
        stage.set_eof_char(self.output_eof_char);
        stage.set_blocking(self.blocking);
        let kind = self.transport.kind();
        stage.set_sync(kind.requires_sync());
        self.output = PipelineState::Built(stage);
        tracing::debug!(channel = %self.label(), %kind, sync = kind.requires_sync(), "output stage built");
        Ok(())
    }

    fn output_stage(&mut self) -> Result<&mut OutputStage> {
        let label = self.label();
        self.output.live_mut().ok_or_else(|| {
            ChannelError::Invariant(format!(
                "output stage of \"{label}\" is not wired after initialisation"
            ))
        })
    }

    /// 已从传输读出、尚未交给调用方的字节数。
    ///
    /// 字符层积压（部分行、预读字符、解码余量）按当前编码还原为字节计入，
    /// 字节层（重放区、缓冲区、EOF 过滤器暂存）直接计入。
    /// 解码器内部尚未凑成字符的半个多字节序列不计入。
    fn input_backlog(&self) -> usize {
        self.input.live().map_or(0, |eol| {
            let decoder = eol.get_ref();
            let decoded: String = eol.pending().chain(decoder.surplus()).collect();
            let markable = decoder.get_ref();
            encode_chars(self.encoding, &decoded).len()
                + markable.available()
                + markable.get_ref().get_ref().held_len()
        })
    }
}

impl<T: Transport> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name())
            .field("kind", &self.transport.kind())
            .field("mode", &self.mode)
            .field("encoding", &self.encoding)
            .field("buffering", &self.buffering)
            .field("buffer_size", &self.buffer_size)
            .field("blocking", &self.blocking)
            .field("eof", &self.eof_seen)
            .field("closed", &self.closed)
            .finish()
    }
}

fn read_line(
    chain: &mut InputChain,
    dst: &mut ChannelData,
    binary: bool,
    blocking: bool,
) -> Result<ReadStatus> {
    match chain.read_line(blocking)? {
        LineRead::Line(line) => {
            let count = line.chars().count();
            if binary {
                dst.bytes_mut().extend(line.chars().map(|c| c as u32 as u8));
            } else {
                dst.text_mut().push_str(&line);
            }
            Ok(ReadStatus::Data(count))
        }
        LineRead::Blocked => Ok(ReadStatus::Data(0)),
        LineRead::Eof => Ok(ReadStatus::Eof),
    }
}

fn read_units(
    chain: &mut InputChain,
    dst: &mut ChannelData,
    binary: bool,
    wanted: usize,
    eof_seen: &mut bool,
) -> Result<ReadStatus> {
    let mut total = 0;
    let mut hit_eof = false;
    if binary {
        let bytes = dst.bytes_mut();
        // 之前的按行读取可能在字符层留下了预读内容。
        let pending = chain.take_pending(wanted);
        bytes.extend(pending.chars().map(|c| c as u32 as u8));
        total += pending.chars().count();
        let markable = chain.get_mut().get_mut();
        let mut scratch = vec![0u8; wanted.saturating_sub(total).min(READ_CHUNK)];
        while total < wanted {
            let want = (wanted - total).min(READ_CHUNK);
            match markable.read_bytes(&mut scratch[..want])? {
                Progress::Ready(n) => {
                    bytes.extend_from_slice(&scratch[..n]);
                    total += n;
                }
                Progress::Eof => {
                    hit_eof = true;
                    break;
                }
                Progress::WouldBlock => break,
            }
        }
        if total > 0 {
            chain.get_mut().disarm_bom_sniff();
        }
    } else {
        let text = dst.text_mut();
        while total < wanted {
            let want = (wanted - total).min(READ_CHUNK);
            match chain.read_chars(text, want)? {
                Progress::Ready(n) => total += n,
                Progress::Eof => {
                    hit_eof = true;
                    break;
                }
                Progress::WouldBlock => break,
            }
        }
    }
    if hit_eof {
        *eof_seen = true;
        if total == 0 {
            return Ok(ReadStatus::Eof);
        }
    }
    Ok(ReadStatus::Data(total))
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    #[traced_test]
    fn pipeline_lifecycle_is_logged() {
        let mut channel = Channel::new(MemoryTransport::with_data(*b"x\n"), OpenMode::RDWR);
        let mut dst = ChannelData::default();
        channel.read(&mut dst, ReadKind::Line).expect("read");
        channel.write("y").expect("write");
        channel.close().expect("close");
        assert!(logs_contain("input pipeline built"));
        assert!(logs_contain("output stage built"));
        assert!(logs_contain("channel closed"));
    }

    #[test]
    fn pipelines_are_built_lazily_and_once() {
        let mut channel = Channel::new(MemoryTransport::with_data(*b"abc"), OpenMode::RDWR);
        assert!(!channel.input.is_built());
        assert!(!channel.output.is_built());
        let mut dst = ChannelData::default();
        channel.read(&mut dst, ReadKind::Bytes(1)).expect("read");
        assert!(channel.input.is_built());
        assert!(!channel.output.is_built());
        channel.read(&mut dst, ReadKind::Bytes(1)).expect("read");
        assert_eq!(dst.text(), Some("ab"));
    }

    #[test]
    fn settings_are_stored_before_build_and_pushed_after() {
        let mut channel = Channel::new(MemoryTransport::with_data(*b"abcdef"), OpenMode::RDONLY);
        channel.set_buffer_size(2).expect("size");
        let mut dst = ChannelData::default();
        channel.read(&mut dst, ReadKind::Bytes(1)).expect("read");
        let buffer = channel
            .input
            .live()
            .map(|eol| eol.get_ref().get_ref().get_ref().buffer_size());
        assert_eq!(buffer, Some(2));

        channel.set_buffer_size(8).expect("size");
        channel.set_buffering(Buffering::Line);
        let stage = channel.input.live().map(|eol| {
            let buffer = eol.get_ref().get_ref().get_ref();
            (buffer.buffer_size(), buffer.buffering())
        });
        assert_eq!(stage, Some((8, Buffering::Line)));
    }

    #[test]
    fn read_status_codes() {
        assert_eq!(ReadStatus::Eof.code(), -1);
        assert_eq!(ReadStatus::Data(0).code(), 0);
        let mut data = ChannelData::Text("é".to_owned());
        assert_eq!(data.bytes_mut(), &vec![0xE9]);
        assert_eq!(data.text_mut(), "é");
        assert_eq!(data.len(), 1);
    }
}

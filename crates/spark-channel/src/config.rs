//! 通道配置：访问模式、换行转换、缓冲策略与可反序列化的 [`ChannelOptions`]。
//!
//! # 设计概要（How）
//! - 枚举常量与脚本层选项名一一对应，`FromStr`/`Display` 使用小写名称；
//! - [`ChannelOptions`] 通过 `serde` 反序列化，所有字段带默认值，
//!   由 [`Channel::with_options`](crate::Channel::with_options) 经普通 setter 校验后生效。

use core::fmt;
use core::ops::{BitOr, BitOrAssign};
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// 默认缓冲区大小（字节）。
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
/// 可接受的最小缓冲区大小。
pub const MIN_BUFFER_SIZE: usize = 1;
/// 可接受的最大缓冲区大小（1 MiB）。
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;
/// 通道未显式配置时使用的编码。
pub const DEFAULT_ENCODING: &str = "utf-8";

/// 通道访问模式位标志。
///
/// 读写判定只看 `RDONLY`/`WRONLY`/`RDWR` 三位；`APPEND` 让每次写入前先定位到流末尾；
/// 其余位由传输在打开时使用，本层只透传。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct OpenMode(u8);

impl OpenMode {
    /// 只读。
    pub const RDONLY: OpenMode = OpenMode(1);
    /// 只写。
    pub const WRONLY: OpenMode = OpenMode(1 << 1);
    /// 读写。
    pub const RDWR: OpenMode = OpenMode(1 << 2);
    /// 追加写。
    pub const APPEND: OpenMode = OpenMode(1 << 3);
    /// 不存在则创建。
    pub const CREAT: OpenMode = OpenMode(1 << 4);
    /// 与 `CREAT` 连用，已存在则失败。
    pub const EXCL: OpenMode = OpenMode(1 << 5);
    /// 打开时截断。
    pub const TRUNC: OpenMode = OpenMode(1 << 6);

    /// 由原始位构造。
    pub const fn from_bits(bits: u8) -> Self {
        OpenMode(bits)
    }

    /// 原始位。
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// 是否包含 `other` 的全部位。
    pub const fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// 是否允许读取。
    pub const fn is_readable(self) -> bool {
        self.contains(Self::RDONLY) || self.contains(Self::RDWR)
    }

    /// 是否允许写入。
    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRONLY) || self.contains(Self::RDWR)
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        OpenMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenMode {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// 配置值名称无法识别。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownOption {
    kind: &'static str,
    value: String,
}

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad {} \"{}\"", self.kind, self.value)
    }
}

impl std::error::Error for UnknownOption {}

/// 换行转换模式。
///
/// - 输入侧：`Auto` 在首次遇到 CR/LF/CRLF 时锁定该形式；`Platform` 等价于本机换行；
///   `Binary` 与 `Lf` 一样不做转换。
/// - 输出侧：`Auto` 与 `Platform` 都输出本机换行。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Translation {
    /// 自动探测。
    Auto,
    /// `\n`。
    Lf,
    /// `\r`。
    Cr,
    /// `\r\n`。
    Crlf,
    /// 不做转换。
    Binary,
    /// 本机换行。
    Platform,
}

impl Translation {
    /// 本机换行对应的固定模式。
    pub const fn native() -> Translation {
        if cfg!(windows) {
            Translation::Crlf
        } else {
            Translation::Lf
        }
    }

    /// 输出时 `\n` 被替换成的字节序列。
    pub(crate) fn output_eol(self) -> &'static [u8] {
        match self {
            Translation::Auto | Translation::Platform => Translation::native().output_eol(),
            Translation::Lf | Translation::Binary => b"\n",
            Translation::Cr => b"\r",
            Translation::Crlf => b"\r\n",
        }
    }

    /// 小写名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            Translation::Auto => "auto",
            Translation::Lf => "lf",
            Translation::Cr => "cr",
            Translation::Crlf => "crlf",
            Translation::Binary => "binary",
            Translation::Platform => "platform",
        }
    }
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Translation {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Translation::Auto),
            "lf" => Ok(Translation::Lf),
            "cr" => Ok(Translation::Cr),
            "crlf" => Ok(Translation::Crlf),
            "binary" => Ok(Translation::Binary),
            "platform" => Ok(Translation::Platform),
            other => Err(UnknownOption {
                kind: "translation",
                value: other.to_owned(),
            }),
        }
    }
}

/// 缓冲策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Buffering {
    /// 尽量攒满缓冲区再与底层交互。
    #[default]
    Full,
    /// 按行对齐：输入一次最多交出一行，输出遇换行即刷新。
    Line,
    /// 直通，不缓存。
    None,
}

impl Buffering {
    /// 小写名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            Buffering::Full => "full",
            Buffering::Line => "line",
            Buffering::None => "none",
        }
    }
}

impl fmt::Display for Buffering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Buffering {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Buffering::Full),
            "line" => Ok(Buffering::Line),
            "none" => Ok(Buffering::None),
            other => Err(UnknownOption {
                kind: "buffering",
                value: other.to_owned(),
            }),
        }
    }
}

/// 通道配置快照。
///
/// # 契约说明（What）
/// - 字段名在序列化形式中使用 kebab-case，缺省字段取 [`Default`] 值；
/// - `encoding` 为 `None` 或 `"binary"` 表示二进制通道；
/// - EOF 标记为 0 表示未启用。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChannelOptions {
    /// 阻塞模式。
    pub blocking: bool,
    /// 缓冲策略。
    pub buffering: Buffering,
    /// 缓冲区大小（字节）。
    pub buffer_size: usize,
    /// 编码名称。
    pub encoding: Option<String>,
    /// 输入换行转换。
    pub input_translation: Translation,
    /// 输出换行转换。
    pub output_translation: Translation,
    /// 输入 EOF 标记字节。
    pub input_eof_char: u8,
    /// 输出 EOF 标记字节。
    pub output_eof_char: u8,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            blocking: true,
            buffering: Buffering::Full,
            buffer_size: DEFAULT_BUFFER_SIZE,
            encoding: Some(DEFAULT_ENCODING.to_owned()),
            input_translation: Translation::Auto,
            output_translation: Translation::Platform,
            input_eof_char: 0,
            output_eof_char: 0,
        }
    }
}

impl ChannelOptions {
    /// 二进制通道的常用组合：无编码、无换行转换。
    pub fn binary() -> Self {
        Self {
            encoding: None,
            input_translation: Translation::Binary,
            output_translation: Translation::Binary,
            ..Self::default()
        }
    }
}

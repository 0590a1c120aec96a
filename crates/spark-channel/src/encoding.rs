//! 编码名称解析。
//!
//! 脚本层沿用的编码名（`iso8859-1`、`unicode`、`shiftjis` …）先经别名表归一，
//! 再交给 `encoding_rs` 的 WHATWG 标签查找；`binary`/`identity` 表示不做编码转换。
//! Latin-1 不经 WHATWG 表，按字节与码位一一对应处理。

use core::fmt;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

use crate::error::{ChannelError, Result};

/// 脚本层对 ISO-8859-1 的规范名称。
const LATIN1_NAME: &str = "iso8859-1";

/// 编解码实现。
///
/// WHATWG 把 `iso-8859-1` 标签映射到 windows-1252，0x80–0x9F 会被改写；
/// Latin-1 因此单独走字节与 U+0000–U+00FF 一一对应的路径。
#[derive(Clone, Copy, PartialEq, Eq)]
enum Codec {
    Latin1,
    Whatwg(&'static Encoding),
}

/// 已解析的文本编码。
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TextEncoding {
    name: &'static str,
    codec: Codec,
}

impl TextEncoding {
    /// UTF-8。
    pub fn utf8() -> TextEncoding {
        TextEncoding {
            name: UTF_8.name(),
            codec: Codec::Whatwg(UTF_8),
        }
    }

    /// ISO-8859-1，字节与 U+0000–U+00FF 一一对应。
    pub fn latin1() -> TextEncoding {
        TextEncoding {
            name: LATIN1_NAME,
            codec: Codec::Latin1,
        }
    }

    /// 解析编码名；`Ok(None)` 表示二进制（无编码）。
    pub fn lookup(name: &str) -> Result<Option<TextEncoding>> {
        let normalized = name.trim().to_ascii_lowercase();
        let label = match normalized.as_str() {
            "binary" | "identity" => return Ok(None),
            "iso8859-1" | "iso-8859-1" | "iso_8859-1" | "latin1" | "l1" => {
                return Ok(Some(TextEncoding::latin1()));
            }
            "unicode" if cfg!(target_endian = "big") => "utf-16be",
            "unicode" => "utf-16le",
            "shiftjis" => "shift_jis",
            "euc-cn" => "gb2312",
            "iso2022-jp" => "iso-2022-jp",
            other => other,
        };
        // `iso8859-N` 形式补齐连字符后再查标签表。
        let owned;
        let label = match label.strip_prefix("iso8859-") {
            Some(rest) => {
                owned = format!("iso-8859-{rest}");
                owned.as_str()
            }
            None => label,
        };
        Encoding::for_label(label.as_bytes())
            .map(|encoding| {
                Some(TextEncoding {
                    name: encoding.name(),
                    codec: Codec::Whatwg(encoding),
                })
            })
            .ok_or_else(|| ChannelError::UnknownEncoding {
                name: name.to_owned(),
            })
    }

    /// 规范名称：Latin-1 为 `iso8859-1`，其余为 `encoding_rs` 的名称。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 是否为逐字节映射的 Latin-1。
    pub(crate) fn is_latin1(&self) -> bool {
        self.codec == Codec::Latin1
    }

    /// 是否为 UTF-16（两种字节序之一）。
    pub(crate) fn is_utf16(&self) -> bool {
        matches!(self.codec, Codec::Whatwg(enc) if enc == UTF_16LE || enc == UTF_16BE)
    }

    /// 是否为 UTF-16BE。
    pub(crate) fn is_utf16_be(&self) -> bool {
        self.codec == Codec::Whatwg(UTF_16BE)
    }

    /// 需要在流首探测 BOM 时返回对应的 `encoding_rs` 编码（UTF-8 与 UTF-16）。
    pub(crate) fn bom_encoding(&self) -> Option<&'static Encoding> {
        match self.codec {
            Codec::Whatwg(enc) if enc == UTF_8 || self.is_utf16() => Some(enc),
            _ => None,
        }
    }

    /// 流式解码器；Latin-1 不需要解码器状态。
    pub(crate) fn new_decoder(&self) -> Option<encoding_rs::Decoder> {
        match self.codec {
            Codec::Latin1 => None,
            Codec::Whatwg(enc) => Some(enc.new_decoder_without_bom_handling()),
        }
    }

    /// 流式编码器；Latin-1 与 UTF-16 由调用方直接编码。
    pub(crate) fn new_encoder(&self) -> Option<encoding_rs::Encoder> {
        match self.codec {
            Codec::Whatwg(enc) if !self.is_utf16() => Some(enc.new_encoder()),
            _ => None,
        }
    }

    /// 每个字符至少占用的字节数：UTF-16 为 2，其余为 1。
    ///
    /// 解码器据此确定一次读取的字节数，保证产出的字符不超过请求量。
    pub fn bytes_per_char(&self) -> usize {
        if self.is_utf16() { 2 } else { 1 }
    }
}

/// 把已解码、尚未交出的字符还原为字节；`None` 表示二进制，取每个字符的低 8 位。
///
/// 用于定位时换算输入侧的积压量，以及更换 EOF 标记时把字符退回字节层重新扫描。
/// 无法映射的字符写作 `?`。
pub(crate) fn encode_chars(encoding: Option<TextEncoding>, text: &str) -> Vec<u8> {
    let Some(enc) = encoding else {
        return text.chars().map(|c| c as u32 as u8).collect();
    };
    match enc.codec {
        Codec::Latin1 => text.chars().map(latin1_byte).collect(),
        Codec::Whatwg(_) if enc.is_utf16() => {
            let big_endian = enc.is_utf16_be();
            text.encode_utf16()
                .flat_map(|unit| {
                    if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    }
                })
                .collect()
        }
        Codec::Whatwg(encoding) if encoding == UTF_8 => text.as_bytes().to_vec(),
        Codec::Whatwg(encoding) => encoding.encode(text).0.into_owned(),
    }
}

/// Latin-1 编码单个字符，超出 U+00FF 的字符写作 `?`。
pub(crate) fn latin1_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

impl fmt::Debug for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextEncoding").field(&self.name).finish()
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_names_mean_no_encoding() {
        assert_eq!(TextEncoding::lookup("binary").expect("lookup"), None);
        assert_eq!(TextEncoding::lookup("identity").expect("lookup"), None);
    }

    #[test]
    fn script_aliases_resolve() {
        let latin = TextEncoding::lookup("iso8859-1")
            .expect("lookup")
            .expect("some encoding");
        assert_eq!(latin.bytes_per_char(), 1);
        assert_eq!(latin.name(), "iso8859-1");
        assert_eq!(TextEncoding::lookup("latin1").expect("lookup"), Some(latin));
        let sjis = TextEncoding::lookup("shiftjis")
            .expect("lookup")
            .expect("some encoding");
        assert_eq!(sjis.name(), "Shift_JIS");
        let unicode = TextEncoding::lookup("unicode")
            .expect("lookup")
            .expect("some encoding");
        assert_eq!(unicode.bytes_per_char(), 2);
        assert_eq!(
            TextEncoding::lookup("UTF-8").expect("lookup"),
            Some(TextEncoding::utf8())
        );
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = TextEncoding::lookup("klingon").expect_err("unknown");
        assert_eq!(err.code(), crate::error::codes::UNKNOWN_ENCODING);
    }

    #[test]
    fn encode_chars_inverts_each_codec() {
        assert_eq!(encode_chars(None, "a\u{e9}"), vec![b'a', 0xE9]);
        assert_eq!(
            encode_chars(Some(TextEncoding::latin1()), "\u{80}\u{ff}\u{20ac}"),
            vec![0x80, 0xFF, b'?']
        );
        assert_eq!(encode_chars(Some(TextEncoding::utf8()), "\u{e9}"), vec![0xC3, 0xA9]);
        let utf16be = TextEncoding::lookup("utf-16be")
            .expect("lookup")
            .expect("some encoding");
        assert_eq!(encode_chars(Some(utf16be), "A"), vec![0x00, b'A']);
        let sjis = TextEncoding::lookup("shiftjis")
            .expect("lookup")
            .expect("some encoding");
        assert_eq!(encode_chars(Some(sjis), "a"), vec![b'a']);
    }
}

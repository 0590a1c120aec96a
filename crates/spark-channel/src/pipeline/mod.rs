//! 过滤链各阶段及其能力接口。
//!
//! # 模块定位（Why）
//! - 输入侧：`原始字节源 → EofFilter → InputBuffer → Markable → Decoder → EolFilter`，
//!   每一层按值持有上一层，组合而成，不依赖运行时继承；
//! - 输出侧：[`OutputStage`] 一次完成编码、换行转换、缓冲与 EOF 标记追加。
//!
//! # 契约定义（What）
//! - 字节层实现 [`ByteSource`]，字符层实现 [`CharSource`]；
//! - 二者都以 [`Progress`] 区分“有数据”“暂无数据（非阻塞）”“流结束”三种结果，
//!   IO 失败通过 `io::Result` 原样上抛。

mod buffer;
mod decoder;
mod eof;
mod eol;
mod markable;
mod output;

use std::io;

pub use buffer::InputBuffer;
pub use decoder::Decoder;
pub use eof::EofFilter;
pub use eol::{EolFilter, LineRead};
pub use markable::{Lookahead, Markable};
pub use output::{OutputStage, OutputValue, RawSink};

/// 一次读取调用的推进结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// 读到 `n` 个单位（字节或字符），`n > 0`。
    Ready(usize),
    /// 底层暂无可用数据，稍后可能还有。
    WouldBlock,
    /// 流已结束。
    Eof,
}

impl Progress {
    /// 推进的单位数，非 `Ready` 时为 0。
    pub fn count(self) -> usize {
        match self {
            Progress::Ready(n) => n,
            Progress::WouldBlock | Progress::Eof => 0,
        }
    }
}

/// 字节层读取能力。
pub trait ByteSource {
    /// 读取至多 `buf.len()` 字节。`buf` 非空时不得返回 `Ready(0)`。
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<Progress>;

    /// 本层及上游已缓存、尚未交出的字节数。
    fn available(&self) -> usize {
        0
    }
}

/// 字符层读取能力。
pub trait CharSource {
    /// 向 `out` 追加至多 `max` 个字符。`max > 0` 时不得返回 `Ready(0)`。
    fn read_chars(&mut self, out: &mut String, max: usize) -> io::Result<Progress>;

    /// 本层及上游已缓存、尚未交出的单位数。
    fn available(&self) -> usize {
        0
    }
}

/// 原始读端装箱后的类型。
pub type RawSource = Box<dyn io::Read + Send>;

/// 输入侧完整过滤链的具体类型。
pub type InputChain = EolFilter<Decoder<Markable<InputBuffer<EofFilter<RawSource>>>>>;

/// 管线的一次性构建状态。
#[derive(Debug, Default)]
pub(crate) enum PipelineState<P> {
    /// 尚未发生首次读/写。
    #[default]
    Unbuilt,
    /// 已构建，可直接推送配置。
    Built(P),
}

impl<P> PipelineState<P> {
    pub(crate) fn live(&self) -> Option<&P> {
        match self {
            PipelineState::Unbuilt => None,
            PipelineState::Built(stage) => Some(stage),
        }
    }

    pub(crate) fn live_mut(&mut self) -> Option<&mut P> {
        match self {
            PipelineState::Unbuilt => None,
            PipelineState::Built(stage) => Some(stage),
        }
    }

    pub(crate) fn is_built(&self) -> bool {
        matches!(self, PipelineState::Built(_))
    }

    /// 拆除管线，返回被拆下的阶段。
    pub(crate) fn take(&mut self) -> Option<P> {
        match std::mem::take(self) {
            PipelineState::Unbuilt => None,
            PipelineState::Built(stage) => Some(stage),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 各阶段单元测试共用的脚本化数据源。

    use std::collections::VecDeque;
    use std::io;

    use super::{ByteSource, Progress};

    /// 按预设步骤返回数据的字节源：`Some(bytes)` 交出数据，`None` 表示一次 `WouldBlock`。
    pub(crate) struct ScriptedSource {
        steps: VecDeque<Option<Vec<u8>>>,
        pub(crate) calls: usize,
    }

    impl ScriptedSource {
        pub(crate) fn new<I>(steps: I) -> Self
        where
            I: IntoIterator<Item = Option<&'static [u8]>>,
        {
            Self {
                steps: steps.into_iter().map(|s| s.map(<[u8]>::to_vec)).collect(),
                calls: 0,
            }
        }
    }

    impl ByteSource for ScriptedSource {
        fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<Progress> {
            self.calls += 1;
            match self.steps.pop_front() {
                None => Ok(Progress::Eof),
                Some(None) => Ok(Progress::WouldBlock),
                Some(Some(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.steps.push_front(Some(data.split_off(n)));
                    }
                    Ok(Progress::Ready(n))
                }
            }
        }
    }
}

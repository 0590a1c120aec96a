use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::channel::Channel;
use crate::error::Result;
use crate::transport::Transport;

/// 多所有者共享的通道句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：多个解释器实例可以同时持有同一通道，通道本身不加锁，
///   由本句柄用互斥锁把所有操作串行化；
/// - **逻辑 (How)**：[`attach`](Self::attach) 复制句柄并把引用计数加一，
///   [`detach`](Self::detach) 减一，计数归零的那个所有者负责关闭通道；
/// - **契约 (What)**：句柄不实现 `Clone`，新增所有者只能经 `attach`，计数因此与句柄数一致；
///   直接丢弃句柄不会关闭通道，关闭总是显式发生。
pub struct SharedChannel<T: Transport> {
    inner: Arc<Mutex<Channel<T>>>,
}

impl<T: Transport> SharedChannel<T> {
    /// 以 `channel` 创建第一个所有者。
    pub fn new(channel: Channel<T>) -> Self {
        channel.retain();
        Self {
            inner: Arc::new(Mutex::new(channel)),
        }
    }

    /// 增加一个所有者。
    pub fn attach(&self) -> Self {
        let count = self.inner.lock().retain();
        tracing::debug!(owners = count, "shared channel attached");
        Self {
            inner: Arc::clone(&self.inner),
        }
    }

    /// 移除当前所有者，返回剩余所有者数；最后一个所有者离开时关闭通道。
    pub fn detach(self) -> Result<usize> {
        let mut channel = self.inner.lock();
        let left = channel.release();
        if left == 0 {
            tracing::debug!(channel = ?channel.name(), "last owner detached, closing channel");
            channel.close()?;
        }
        Ok(left)
    }

    /// 在持锁状态下操作通道。
    pub fn with<R>(&self, f: impl FnOnce(&mut Channel<T>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// 取得通道锁。
    pub fn lock(&self) -> MutexGuard<'_, Channel<T>> {
        self.inner.lock()
    }

    /// 当前所有者数。
    pub fn ref_count(&self) -> usize {
        self.inner.lock().ref_count()
    }
}

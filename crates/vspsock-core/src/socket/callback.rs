//! Socket 事件回调

use super::SocketState;
use crate::error::VspError;
use tokio::sync::mpsc;

/// Socket 事件回调
///
/// 所有方法都在 [`VspSocket`](super::VspSocket) 的调用线程上同步执行，
/// 默认实现为空。
pub trait SocketCallback: Send + Sync {
    /// 每次状态转换
    fn on_state_changed(&self, _state: SocketState) {}
    /// 握手完成，可以读写
    fn on_connected(&self) {}
    /// 关闭完成
    fn on_disconnected(&self) {}
    /// 接收缓冲区有新数据
    fn on_ready_read(&self) {}
    /// 一个数据包已被对端确认
    fn on_bytes_written(&self, _bytes: usize) {}
    /// 关闭开始，之后不会再有数据
    fn on_read_channel_finished(&self) {}
    fn on_error(&self, _error: &VspError) {}
}

/// 忽略所有事件
pub struct NoopCallback;

impl SocketCallback for NoopCallback {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    StateChanged(SocketState),
    Connected,
    Disconnected,
    ReadyRead,
    BytesWritten(usize),
    ReadChannelFinished,
    Error(VspError),
}

/// 把事件转发到 channel 的回调实现
pub struct SimpleSocketCallback {
    tx: mpsc::UnboundedSender<SocketEvent>,
}

impl SimpleSocketCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SocketEvent) {
        let _ = self.tx.send(event);
    }
}

impl SocketCallback for SimpleSocketCallback {
    fn on_state_changed(&self, state: SocketState) {
        self.send(SocketEvent::StateChanged(state));
    }

    fn on_connected(&self) {
        self.send(SocketEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.send(SocketEvent::Disconnected);
    }

    fn on_ready_read(&self) {
        self.send(SocketEvent::ReadyRead);
    }

    fn on_bytes_written(&self, bytes: usize) {
        self.send(SocketEvent::BytesWritten(bytes));
    }

    fn on_read_channel_finished(&self) {
        self.send(SocketEvent::ReadChannelFinished);
    }

    fn on_error(&self, error: &VspError) {
        self.send(SocketEvent::Error(error.clone()));
    }
}

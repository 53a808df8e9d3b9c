//! VSP Socket - 基于 BLE VSP/BRSP 服务的串口式字节流
//!
//! 用法与普通 socket 类似：
//!
//! 1. [`VspSocket::connect`] 进入 `Connecting`
//! 2. 把传输层的每个完成事件交给 [`VspSocket::handle_event`]
//! 3. 握手完成后状态变为 `Connected`，回调收到 `on_connected`
//! 4. [`VspSocket::read`] / [`VspSocket::write`] 只搬运缓冲区数据，从不阻塞
//! 5. [`VspSocket::close`] 在任何状态下都会完整地断开并重置
//!
//! 任何时候都可能通过 [`SocketCallback::on_error`] 报告错误；除 `try_ready`
//! 以外，没有错误会被静默吞掉。

mod callback;
mod handshake;

#[cfg(test)]
mod tests;

pub use callback::{NoopCallback, SimpleSocketCallback, SocketCallback, SocketEvent};

use crate::channel::DuplexChannel;
use crate::config::SocketConfig;
use crate::error::{ErrorKind, VspError};
use crate::link::Link;
use crate::profile::Manufacturer;
use crate::transport::{Transport, TransportEvent};
use handshake::{Session, Signal};
use log::{debug, info, warn};
use std::fmt;
use std::io;
use std::time::Instant;

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    Unconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketState::Unconnected => "unconnected",
            SocketState::Connecting => "connecting",
            SocketState::Connected => "connected",
            SocketState::Closing => "closing",
        };
        write!(f, "{}", name)
    }
}

pub struct VspSocket<T: Transport> {
    transport: T,
    config: SocketConfig,
    callback: Box<dyn SocketCallback>,
    state: SocketState,
    last_error: Option<ErrorKind>,
    session: Option<Session>,
}

impl<T: Transport> VspSocket<T> {
    /// 使用默认配置（4096 字节缓冲区，无握手超时）
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: SocketConfig::default(),
            callback: Box::new(NoopCallback),
            state: SocketState::Unconnected,
            last_error: None,
            session: None,
        }
    }

    pub fn with_config(transport: T, config: SocketConfig) -> Result<Self, VspError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            callback: Box::new(NoopCallback),
            state: SocketState::Unconnected,
            last_error: None,
            session: None,
        })
    }

    pub fn set_callback<C: SocketCallback + 'static>(&mut self, callback: C) {
        self.callback = Box::new(callback);
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// 最后一次报告的错误
    pub fn error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// 握手已完成
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    /// socket 总是顺序设备
    pub fn is_sequential(&self) -> bool {
        true
    }

    /// 当前连接所用的厂商（服务发现之后才可知）
    pub fn manufacturer(&self) -> Option<Manufacturer> {
        self.session.as_ref().and_then(Session::manufacturer)
    }

    pub fn rts(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.channel.flow().rts())
    }

    pub fn cts(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.channel.flow().cts())
    }

    pub fn bytes_available(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.channel.bytes_available())
    }

    pub fn bytes_to_write(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.channel.bytes_to_write())
    }

    pub fn can_read_line(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.channel.can_read_line())
    }

    /// 握手截止时间（未配置超时或已连接时为 None）
    pub fn deadline(&self) -> Option<Instant> {
        self.session
            .as_ref()
            .filter(|session| !session.is_open())
            .and_then(|session| session.deadline)
    }

    /// 开始连接；只有在 `Unconnected` 状态下有效
    pub fn connect(&mut self, device: &T::Device) {
        if self.state != SocketState::Unconnected {
            debug!("connect() ignored in state {}", self.state);
            return;
        }

        let deadline = self
            .config
            .handshake_timeout()
            .map(|timeout| Instant::now() + timeout);
        self.session = Some(Session::new(self.config.max_buffer_size, deadline));
        self.last_error = None;

        info!("Connecting to VSP peripheral");
        self.transport.connect(device);
        self.set_state(SocketState::Connecting);
    }

    /// 关闭连接并丢弃本次连接的所有缓冲和流控状态
    ///
    /// 在握手过程中同样有效；在 `Unconnected` 状态下什么都不做。
    pub fn close(&mut self) {
        if self.state == SocketState::Unconnected {
            return;
        }

        self.set_state(SocketState::Closing);
        self.callback.on_read_channel_finished();

        self.transport.disconnect();
        self.session = None;

        self.set_state(SocketState::Unconnected);
        self.callback.on_disconnected();
        info!("VSP socket closed");
    }

    /// 与 [`close`](Self::close) 相同
    pub fn disconnect_from_service(&mut self) {
        self.close();
    }

    /// 处理一个传输层完成事件
    pub fn handle_event(&mut self, event: TransportEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!("Dropping transport event without session: {:?}", event);
            return;
        };

        let mut signals = Vec::new();
        session.advance(event, &mut self.transport, &mut signals);
        self.publish(signals);
    }

    /// 检查握手截止时间；超时则报告错误并关闭，返回是否发生了超时
    pub fn poll_deadline(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline() else {
            return false;
        };
        if now < deadline {
            return false;
        }

        let timeout = self
            .config
            .handshake_timeout()
            .map_or(0, |timeout| timeout.as_millis());
        self.report(VspError::HandshakeTimeout(timeout));
        self.close();
        true
    }

    /// 读取最多 `buf.len()` 字节；没有数据时返回 0
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, VspError> {
        self.ensure_connected("read")?;
        Ok(self
            .with_link(|channel, link, transport| channel.read(buf, link, transport))
            .unwrap_or(0))
    }

    /// 读取一行（包含 `\n`），最多 `max_len` 字节
    pub fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>, VspError> {
        self.ensure_connected("read")?;
        Ok(self
            .with_link(|channel, link, transport| channel.read_line(max_len, link, transport))
            .unwrap_or_default())
    }

    /// 写入发送缓冲区；超过缓冲区上限时整个写入被拒绝
    pub fn write(&mut self, data: &[u8]) -> Result<usize, VspError> {
        self.ensure_connected("write")?;
        let result = self
            .with_link(|channel, link, transport| channel.write(data, link, transport))
            .unwrap_or(Ok(0));
        result.inspect_err(|err| self.report(err.clone()))
    }

    /// 手动清除 RTS（应用暂停或即将退出）
    pub fn force_unready(&mut self) {
        self.with_link(|channel, link, transport| channel.force_unready(link, transport));
    }

    /// 手动恢复 RTS；缓冲区已满时静默失败，不报告错误
    pub fn try_ready(&mut self) -> bool {
        self.with_link(|channel, link, transport| channel.try_ready(link, transport))
            .unwrap_or(false)
    }

    fn ensure_connected(&mut self, op: &'static str) -> Result<(), VspError> {
        if self.state == SocketState::Connected {
            return Ok(());
        }
        let err = VspError::NotConnected(op);
        self.report(err.clone());
        Err(err)
    }

    /// 链路解析完成后才有意义的操作
    fn with_link<R>(
        &mut self,
        f: impl FnOnce(&mut DuplexChannel, &Link, &mut T) -> R,
    ) -> Option<R> {
        let session = self.session.as_mut()?;
        let link = session.phase.link()?;
        Some(f(&mut session.channel, link, &mut self.transport))
    }

    fn set_state(&mut self, state: SocketState) {
        debug!("Socket state: {} -> {}", self.state, state);
        self.state = state;
        self.callback.on_state_changed(state);
    }

    fn report(&mut self, error: VspError) {
        warn!("VSP error: {}", error);
        self.last_error = Some(error.kind());
        self.callback.on_error(&error);
    }

    fn publish(&mut self, signals: Vec<Signal>) {
        for signal in signals {
            match signal {
                Signal::Opened => {
                    info!("VSP handshake complete");
                    self.set_state(SocketState::Connected);
                    self.callback.on_connected();
                    // 握手期间可能已经收到数据
                    if self.bytes_available() > 0 {
                        self.callback.on_ready_read();
                    }
                }
                Signal::ReadyRead => self.callback.on_ready_read(),
                Signal::BytesWritten(n) => self.callback.on_bytes_written(n),
                Signal::Error(err) => self.report(err),
            }
        }
    }
}

impl<T: Transport> Drop for VspSocket<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> io::Read for VspSocket<T> {
    /// 已连接但暂无数据时返回 `WouldBlock`，而不是表示 EOF 的 0
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match VspSocket::read(self, buf)? {
            0 => Err(io::ErrorKind::WouldBlock.into()),
            n => Ok(n),
        }
    }
}

impl<T: Transport> io::Write for VspSocket<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(VspSocket::write(self, buf)?)
    }

    /// 只尝试发送下一个数据包，不等待确认
    fn flush(&mut self) -> io::Result<()> {
        self.with_link(|channel, link, transport| channel.flush_attempt(link, transport));
        Ok(())
    }
}

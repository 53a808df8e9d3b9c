//! stdin/stdout <-> VSP socket 桥接
//!
//! 单个任务里 select 四个来源：传输层事件、socket 事件、stdin 行、Ctrl-C。
//! 握手超时通过 `sleep_until(socket.deadline())` 驱动。

use anyhow::{Result, bail};
use std::collections::VecDeque;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc::UnboundedReceiver;
use vspsock_core::{BtleplugTransport, ErrorKind, SocketEvent, TransportEvent, VspSocket};

type Socket = VspSocket<BtleplugTransport>;

pub struct Bridge {
    socket: Socket,
    transport_events: UnboundedReceiver<TransportEvent>,
    socket_events: UnboundedReceiver<SocketEvent>,
    /// 等待发送缓冲区有空间的 stdin 行
    pending: VecDeque<Vec<u8>>,
    stdout: Stdout,
    /// stdin 结束后继续输出外设数据，直到 Ctrl-C 或断开
    listen: bool,
}

impl Bridge {
    pub fn new(
        socket: Socket,
        transport_events: UnboundedReceiver<TransportEvent>,
        socket_events: UnboundedReceiver<SocketEvent>,
        listen: bool,
    ) -> Self {
        Self {
            socket,
            transport_events,
            socket_events,
            pending: VecDeque::new(),
            stdout: tokio::io::stdout(),
            listen,
        }
    }

    /// 运行到 stdin 结束且输入发完、Ctrl-C、断开或握手失败
    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        let result = loop {
            let deadline = self.socket.deadline();
            tokio::select! {
                Some(event) = self.transport_events.recv() => {
                    self.socket.handle_event(event);
                }
                Some(event) = self.socket_events.recv() => {
                    match self.on_socket_event(event).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                line = lines.next_line(), if stdin_open => match line? {
                    Some(line) => {
                        let mut bytes = line.into_bytes();
                        bytes.push(b'\n');
                        self.pending.push_back(bytes);
                        self.pump();
                    }
                    None => {
                        tracing::debug!("stdin closed");
                        stdin_open = false;
                    }
                },
                () = sleep_until(deadline) => {
                    self.socket.poll_deadline(Instant::now());
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted");
                    break Ok(());
                }
            }

            let queued = self.pending.len() + self.socket.bytes_to_write();
            if !stdin_open && input_done(self.listen, self.socket.is_open(), queued) {
                break Ok(());
            }
        };

        self.socket.force_unready();
        self.socket.close();
        result
    }

    /// 返回 false 表示桥接应当结束
    async fn on_socket_event(&mut self, event: SocketEvent) -> Result<bool> {
        match event {
            SocketEvent::StateChanged(state) => tracing::debug!("Socket state: {}", state),
            SocketEvent::Connected => {
                tracing::info!(
                    "Connected ({})",
                    self.socket
                        .manufacturer()
                        .map_or("unknown", |m| m.name())
                );
                self.pump();
            }
            SocketEvent::ReadyRead => self.copy_to_stdout().await?,
            SocketEvent::BytesWritten(_) => self.pump(),
            SocketEvent::ReadChannelFinished => {}
            SocketEvent::Disconnected => return Ok(false),
            SocketEvent::Error(e) => {
                if is_fatal(e.kind(), self.socket.is_open()) {
                    bail!(e);
                }
                tracing::warn!("{}", e);
            }
        }
        Ok(true)
    }

    async fn copy_to_stdout(&mut self) -> Result<()> {
        let mut buf = [0u8; 512];
        loop {
            let n = self.socket.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.stdout.write_all(&buf[..n]).await?;
        }
        self.stdout.flush().await?;
        Ok(())
    }

    /// 把排队的行送进发送缓冲区，只在放得下时才写，避免溢出错误
    fn pump(&mut self) {
        if !self.socket.is_open() {
            return;
        }
        let max = self.socket.config().max_buffer_size;
        while let Some(line) = self.pending.front() {
            if self.socket.bytes_to_write() + line.len() + 1 > max {
                if self.socket.bytes_to_write() == 0 {
                    tracing::warn!("Dropping {}-byte line larger than the send buffer", line.len());
                    self.pending.pop_front();
                    continue;
                }
                break;
            }
            if let Some(line) = self.pending.pop_front() {
                if let Err(e) = self.socket.write(&line) {
                    tracing::warn!("{}", e);
                    break;
                }
            }
        }
    }
}

/// stdin 已结束时，所有输入是否都已被外设确认
///
/// 连接建立之前不算完成，`--listen` 模式下永远不算完成。
fn input_done(listen: bool, open: bool, queued: usize) -> bool {
    !listen && open && queued == 0
}

/// 错误是否意味着这次连接已经无法使用
///
/// 握手期间的传输层错误会让握手停住；缓冲区溢出等错误只需记录。
fn is_fatal(kind: ErrorKind, open: bool) -> bool {
    match kind {
        ErrorKind::NoCompatibleService
        | ErrorKind::MissingCharacteristic
        | ErrorKind::MissingNotificationDescriptor
        | ErrorKind::HandshakeTimeout
        | ErrorKind::OperationError => true,
        ErrorKind::CharacteristicWriteError
        | ErrorKind::CharacteristicReadError
        | ErrorKind::DescriptorWriteError
        | ErrorKind::DescriptorReadError
        | ErrorKind::UnknownError => !open,
        ErrorKind::BufferOverflow | ErrorKind::NotConnected | ErrorKind::InvalidConfig => false,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_before_connect_keeps_running() {
        assert!(!input_done(false, false, 0));
        assert!(input_done(false, true, 0));
    }

    #[test]
    fn test_eof_waits_for_queued_input() {
        assert!(!input_done(false, true, 6));
    }

    #[test]
    fn test_listen_ignores_eof() {
        assert!(!input_done(true, true, 0));
    }

    #[test]
    fn test_overflow_during_handshake_is_not_fatal() {
        assert!(!is_fatal(ErrorKind::BufferOverflow, false));
        assert!(!is_fatal(ErrorKind::BufferOverflow, true));
        assert!(!is_fatal(ErrorKind::NotConnected, false));
    }

    #[test]
    fn test_handshake_failures_are_fatal() {
        assert!(is_fatal(ErrorKind::NoCompatibleService, false));
        assert!(is_fatal(ErrorKind::MissingNotificationDescriptor, false));
        assert!(is_fatal(ErrorKind::HandshakeTimeout, false));
        assert!(is_fatal(ErrorKind::DescriptorWriteError, false));
    }

    #[test]
    fn test_gatt_errors_after_open_are_not_fatal() {
        assert!(!is_fatal(ErrorKind::CharacteristicWriteError, true));
        assert!(!is_fatal(ErrorKind::UnknownError, true));
        // 链路断开
        assert!(is_fatal(ErrorKind::OperationError, true));
    }
}

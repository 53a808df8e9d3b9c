//! 带背压的双向缓冲通道
//!
//! 接收队列和发送队列共享同一个上限 `max_buffer_size`，任何时刻
//! `len + 1 <= max_buffer_size`（与 C 风格缓冲区预留结尾 `\0` 的约定一致）。
//!
//! - 接收：剩余空间不足一个完整数据包时清除 RTS，读取腾出空间后再置位
//! - 发送：仅在 CTS 置位时发送，每次最多 [`PACKET_SIZE`] 字节，同一时刻只有
//!   一个数据包等待确认；确认到达后才从队列中移除并继续发送下一个

use crate::error::{Direction, VspError};
use crate::flow::FlowControl;
use crate::link::Link;
use crate::profile::PACKET_SIZE;
use crate::transport::Transport;
use log::{debug, trace};
use std::collections::VecDeque;

/// `len + extra + 1 <= max`
fn fits(len: usize, extra: usize, max: usize) -> bool {
    len.checked_add(extra)
        .and_then(|n| n.checked_add(1))
        .is_some_and(|needed| needed <= max)
}

#[derive(Debug)]
pub struct DuplexChannel {
    max_buffer_size: usize,
    inbound: VecDeque<u8>,
    outbound: VecDeque<u8>,
    /// 已发出但尚未确认的字节数（位于 outbound 队首）
    in_flight: usize,
    flow: FlowControl,
}

impl DuplexChannel {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            in_flight: 0,
            flow: FlowControl::default(),
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn flow(&self) -> FlowControl {
        self.flow
    }

    pub fn bytes_available(&self) -> usize {
        self.inbound.len()
    }

    pub fn bytes_to_write(&self) -> usize {
        self.outbound.len()
    }

    pub fn can_read_line(&self) -> bool {
        self.inbound.contains(&b'\n')
    }

    /// 还能再容纳一个完整数据包
    fn has_packet_headroom(&self) -> bool {
        fits(self.inbound.len(), PACKET_SIZE, self.max_buffer_size)
    }

    pub fn set_local_ready<T: Transport + ?Sized>(
        &mut self,
        ready: bool,
        link: &Link,
        transport: &mut T,
    ) {
        self.flow.set_local_ready(ready, link, transport);
    }

    /// 处理 tx-fifo 通知
    ///
    /// 溢出时丢弃整个数据包并清除 RTS。
    pub fn on_inbound_chunk<T: Transport + ?Sized>(
        &mut self,
        chunk: &[u8],
        link: &Link,
        transport: &mut T,
    ) -> Result<(), VspError> {
        if !fits(self.inbound.len(), chunk.len(), self.max_buffer_size) {
            self.flow.set_local_ready(false, link, transport);
            return Err(VspError::overflow(Direction::Read, self.max_buffer_size));
        }

        self.inbound.extend(chunk);
        trace!("Inbound +{} bytes ({} buffered)", chunk.len(), self.inbound.len());

        if !self.has_packet_headroom() {
            debug!("Read buffer full, pausing peer");
            self.flow.set_local_ready(false, link, transport);
        }
        Ok(())
    }

    /// 按 FIFO 顺序读取最多 `buf.len()` 字节，不会阻塞
    pub fn read<T: Transport + ?Sized>(
        &mut self,
        buf: &mut [u8],
        link: &Link,
        transport: &mut T,
    ) -> usize {
        let n = buf.len().min(self.inbound.len());
        for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *dst = src;
        }

        if !self.flow.rts() && self.has_packet_headroom() {
            debug!("Read buffer drained, resuming peer");
            self.flow.set_local_ready(true, link, transport);
        }
        n
    }

    /// 读取到第一个 `\n`（包含）为止，最多 `max_len` 字节
    pub fn read_line<T: Transport + ?Sized>(
        &mut self,
        max_len: usize,
        link: &Link,
        transport: &mut T,
    ) -> Vec<u8> {
        let line_len = self
            .inbound
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.inbound.len(), |pos| pos + 1);
        let mut line = vec![0; line_len.min(max_len)];
        let n = self.read(&mut line, link, transport);
        line.truncate(n);
        line
    }

    /// 追加到发送队列并立即尝试发送；溢出时不写入任何字节
    pub fn write<T: Transport + ?Sized>(
        &mut self,
        data: &[u8],
        link: &Link,
        transport: &mut T,
    ) -> Result<usize, VspError> {
        if !fits(self.outbound.len(), data.len(), self.max_buffer_size) {
            return Err(VspError::overflow(Direction::Write, self.max_buffer_size));
        }
        self.outbound.extend(data);
        self.flush_attempt(link, transport);
        Ok(data.len())
    }

    /// 发送队首的一个数据包，返回是否发出了写请求
    pub fn flush_attempt<T: Transport + ?Sized>(&mut self, link: &Link, transport: &mut T) -> bool {
        if !self.flow.cts() || self.in_flight > 0 || self.outbound.is_empty() {
            return false;
        }

        let n = self.outbound.len().min(PACKET_SIZE);
        let packet: Vec<u8> = self.outbound.iter().take(n).copied().collect();
        trace!("Sending packet of {} bytes", n);
        transport.write_characteristic(&link.rx_fifo, &packet);
        self.in_flight = n;
        true
    }

    /// rx-fifo 写入已确认：移除已发送的字节并继续发送，返回确认的字节数
    pub fn on_packet_written<T: Transport + ?Sized>(
        &mut self,
        link: &Link,
        transport: &mut T,
    ) -> usize {
        self.retire_in_flight(link, transport)
    }

    /// rx-fifo 写入失败：丢弃在途数据包（不重发）并继续发送，返回丢弃的字节数
    pub fn on_packet_failed<T: Transport + ?Sized>(
        &mut self,
        link: &Link,
        transport: &mut T,
    ) -> usize {
        self.retire_in_flight(link, transport)
    }

    fn retire_in_flight<T: Transport + ?Sized>(&mut self, link: &Link, transport: &mut T) -> usize {
        let n = std::mem::take(&mut self.in_flight);
        self.outbound.drain(..n);
        self.flush_attempt(link, transport);
        n
    }

    /// modem-out 变化；CTS 恢复时继续发送
    pub fn on_remote_ready_changed<T: Transport + ?Sized>(
        &mut self,
        cts: bool,
        link: &Link,
        transport: &mut T,
    ) {
        if self.flow.on_remote_ready_changed(cts) {
            debug!("CTS set, resuming transmission");
            self.flush_attempt(link, transport);
        }
    }

    /// 手动清除 RTS（例如应用暂停）
    pub fn force_unready<T: Transport + ?Sized>(&mut self, link: &Link, transport: &mut T) {
        if self.flow.rts() {
            self.flow.set_local_ready(false, link, transport);
        }
    }

    /// 手动恢复 RTS；缓冲区空间不足时静默放弃
    pub fn try_ready<T: Transport + ?Sized>(&mut self, link: &Link, transport: &mut T) -> bool {
        if !self.flow.rts() && self.has_packet_headroom() {
            self.flow.set_local_ready(true, link, transport);
            return true;
        }
        false
    }
}

//! 单次连接的握手状态机
//!
//! 每一步都只在上一步的写/读被传输层确认后才发出：
//!
//! ```text
//! connect ─► Connected ─► DiscoveryFinished ─► ServiceDiscovered
//!   ─► [BlueRadios: 写数据模式 0x01] ─► tx-fifo CCCD 01 00
//!   ─► modem-out CCCD 01 00 ─► modem-in RTS 置位 ─► 读 modem-out (CTS) ─► Open
//! ```
//!
//! 与当前步骤不匹配的确认一律忽略。

use crate::channel::DuplexChannel;
use crate::error::VspError;
use crate::flow::decode_rts_byte;
use crate::link::Link;
use crate::profile::{self, DATA_MODE, Manufacturer, ManufacturerProfile, NOTIFY_ON};
use crate::transport::{Transport, TransportEvent};
use log::{debug, info, trace};
use std::time::Instant;

#[derive(Debug)]
pub(crate) enum Phase {
    AwaitingConnection,
    Discovering,
    ResolvingDetails(&'static ManufacturerProfile),
    EnteringDataMode(Link),
    EnablingTxNotify(Link),
    EnablingModemNotify(Link),
    AssertingRts(Link),
    ReadingCts(Link),
    Open(Link),
    /// 握手出错，等待调用方 close()
    Stalled,
}

impl Phase {
    pub(crate) fn link(&self) -> Option<&Link> {
        match self {
            Phase::EnteringDataMode(link)
            | Phase::EnablingTxNotify(link)
            | Phase::EnablingModemNotify(link)
            | Phase::AssertingRts(link)
            | Phase::ReadingCts(link)
            | Phase::Open(link) => Some(link),
            Phase::AwaitingConnection
            | Phase::Discovering
            | Phase::ResolvingDetails(_)
            | Phase::Stalled => None,
        }
    }
}

/// 状态机产生的、需要由 socket 对外发布的信号
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Opened,
    ReadyRead,
    BytesWritten(usize),
    Error(VspError),
}

/// 一次连接尝试的全部可变状态；close() 时整体丢弃
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) phase: Phase,
    pub(crate) channel: DuplexChannel,
    pub(crate) deadline: Option<Instant>,
}

impl Session {
    pub(crate) fn new(max_buffer_size: usize, deadline: Option<Instant>) -> Self {
        Self {
            phase: Phase::AwaitingConnection,
            channel: DuplexChannel::new(max_buffer_size),
            deadline,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open(_))
    }

    pub(crate) fn manufacturer(&self) -> Option<Manufacturer> {
        match &self.phase {
            Phase::ResolvingDetails(profile) => Some(profile.manufacturer),
            phase => phase.link().map(|link| link.profile.manufacturer),
        }
    }

    /// 处理一个传输层完成事件
    pub(crate) fn advance<T: Transport + ?Sized>(
        &mut self,
        event: TransportEvent,
        transport: &mut T,
        signals: &mut Vec<Signal>,
    ) {
        let phase = std::mem::replace(&mut self.phase, Phase::Stalled);
        self.phase = match (phase, event) {
            (Phase::AwaitingConnection, TransportEvent::Connected) => {
                debug!("Transport connected, discovering services");
                transport.discover_services();
                Phase::Discovering
            }
            (Phase::Discovering, TransportEvent::DiscoveryFinished) => {
                match profile::first_compatible(&transport.service_ids()) {
                    Some(profile) => {
                        info!("VSP service mode: {}", profile.manufacturer);
                        transport.discover_details(profile.service_id);
                        Phase::ResolvingDetails(profile)
                    }
                    None => {
                        signals.push(Signal::Error(VspError::NoCompatibleService));
                        Phase::Stalled
                    }
                }
            }
            (Phase::ResolvingDetails(profile), TransportEvent::ServiceDiscovered(service))
                if service == profile.service_id =>
            {
                match Link::resolve(profile, transport) {
                    Ok(link) => Self::start_notifications(link, transport),
                    Err(err) => {
                        signals.push(Signal::Error(err));
                        Phase::Stalled
                    }
                }
            }
            (Phase::EnteringDataMode(link), TransportEvent::CharacteristicWritten(handle, _))
                if link.mode_switch == Some(handle) =>
            {
                debug!("Peripheral switched into data mode");
                transport.write_descriptor(&link.tx_fifo_notify, &NOTIFY_ON);
                Phase::EnablingTxNotify(link)
            }
            (Phase::EnablingTxNotify(link), TransportEvent::DescriptorWritten(handle, value))
                if handle == link.tx_fifo_notify && value == NOTIFY_ON =>
            {
                transport.write_descriptor(&link.modem_out_notify, &NOTIFY_ON);
                Phase::EnablingModemNotify(link)
            }
            (Phase::EnablingModemNotify(link), TransportEvent::DescriptorWritten(handle, value))
                if handle == link.modem_out_notify && value == NOTIFY_ON =>
            {
                self.channel.set_local_ready(true, &link, transport);
                Phase::AssertingRts(link)
            }
            (Phase::AssertingRts(link), TransportEvent::CharacteristicWritten(handle, value))
                if handle == link.modem_in && decode_rts_byte(link.profile, &value) =>
            {
                // CTS 通知可能在订阅前就已发出，主动读一次
                transport.read_characteristic(&link.modem_out);
                Phase::ReadingCts(link)
            }
            (Phase::ReadingCts(link), TransportEvent::CharacteristicRead(handle, value))
                if handle == link.modem_out =>
            {
                let cts = decode_rts_byte(link.profile, &value);
                debug!("Initial CTS: {}", cts);
                self.channel.on_remote_ready_changed(cts, &link, transport);
                signals.push(Signal::Opened);
                Phase::Open(link)
            }
            (Phase::Open(link), event) => {
                Self::data_path(&mut self.channel, &link, event, transport, signals, true);
                Phase::Open(link)
            }
            // 握手期间的任何传输层错误都会中止本次尝试，直到调用方 close()
            (phase, event) => match event.error() {
                Some(err) => {
                    debug!("Handshake stalled in {:?}", phase);
                    signals.push(Signal::Error(err));
                    Phase::Stalled
                }
                None => {
                    if let Some(link) = phase.link() {
                        Self::data_path(&mut self.channel, link, event, transport, signals, false);
                    } else {
                        trace!("Ignoring transport event {:?}", event);
                    }
                    phase
                }
            },
        };
    }

    fn start_notifications<T: Transport + ?Sized>(link: Link, transport: &mut T) -> Phase {
        match link.mode_switch {
            Some(mode_switch) => {
                debug!("Switching peripheral into data mode");
                transport.write_characteristic(&mode_switch, &DATA_MODE);
                Phase::EnteringDataMode(link)
            }
            None => {
                transport.write_descriptor(&link.tx_fifo_notify, &NOTIFY_ON);
                Phase::EnablingTxNotify(link)
            }
        }
    }

    /// 已解析链路后的数据通道事件（握手期间和连接后都会发生）
    fn data_path<T: Transport + ?Sized>(
        channel: &mut DuplexChannel,
        link: &Link,
        event: TransportEvent,
        transport: &mut T,
        signals: &mut Vec<Signal>,
        open: bool,
    ) {
        match event {
            TransportEvent::CharacteristicChanged(handle, value) if handle == link.tx_fifo => {
                trace!("tx-fifo notification: {:02x?}", value);
                match channel.on_inbound_chunk(&value, link, transport) {
                    Ok(()) if open => signals.push(Signal::ReadyRead),
                    Ok(()) => {}
                    Err(err) => signals.push(Signal::Error(err)),
                }
            }
            TransportEvent::CharacteristicChanged(handle, value) if handle == link.modem_out => {
                let cts = decode_rts_byte(link.profile, &value);
                debug!("CTS changed: {}", cts);
                channel.on_remote_ready_changed(cts, link, transport);
            }
            TransportEvent::CharacteristicWritten(handle, _) if handle == link.rx_fifo => {
                let written = channel.on_packet_written(link, transport);
                if written > 0 {
                    signals.push(Signal::BytesWritten(written));
                }
            }
            TransportEvent::CharacteristicWritten(handle, value) if handle == link.modem_in => {
                trace!("modem-in written: {:02x?}", value);
            }
            TransportEvent::CharacteristicWriteFailed(handle, detail) => {
                if handle == link.rx_fifo {
                    let dropped = channel.on_packet_failed(link, transport);
                    debug!("rx-fifo write failed, dropped {} bytes", dropped);
                }
                signals.push(Signal::Error(VspError::CharacteristicWrite(detail)));
            }
            other => match other.error() {
                Some(err) => signals.push(Signal::Error(err)),
                None => trace!("Ignoring transport event {:?}", other),
            },
        }
    }
}

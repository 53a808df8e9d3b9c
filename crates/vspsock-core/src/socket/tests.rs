use super::*;
use crate::profile::{BLUERADIOS, LAIRD, NOTIFY_OFF, NOTIFY_ON};
use crate::transport::TransportFault;
use crate::transport::mock::{RecordingTransport, Request};
use std::io::{Read, Write};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn socket_for(
    profile: &'static crate::ManufacturerProfile,
    config: SocketConfig,
) -> (
    VspSocket<RecordingTransport>,
    Link,
    UnboundedReceiver<SocketEvent>,
) {
    let transport = RecordingTransport::with_profile(profile);
    let link = transport.resolve_link(profile).unwrap();
    let mut socket = VspSocket::with_config(transport, config).unwrap();
    let (callback, events) = SimpleSocketCallback::new();
    socket.set_callback(callback);
    (socket, link, events)
}

fn drain(events: &mut UnboundedReceiver<SocketEvent>) -> Vec<SocketEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// 推进到 modem-out CCCD 写入之前
fn reach_modem_notify(socket: &mut VspSocket<RecordingTransport>, link: &Link) {
    socket.connect(&());
    socket.handle_event(TransportEvent::Connected);
    socket.handle_event(TransportEvent::DiscoveryFinished);
    socket.handle_event(TransportEvent::ServiceDiscovered(link.profile.service_id));
    if let Some(mode_switch) = link.mode_switch {
        socket.handle_event(TransportEvent::CharacteristicWritten(mode_switch, vec![0x01]));
    }
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.tx_fifo_notify,
        NOTIFY_ON.to_vec(),
    ));
}

fn finish(socket: &mut VspSocket<RecordingTransport>, link: &Link) {
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.modem_out_notify,
        NOTIFY_ON.to_vec(),
    ));
    let set = vec![link.profile.rts_set_byte];
    socket.handle_event(TransportEvent::CharacteristicWritten(link.modem_in, set.clone()));
    socket.handle_event(TransportEvent::CharacteristicRead(link.modem_out, set));
}

#[test]
fn test_initial_state() {
    let socket = VspSocket::new(RecordingTransport::new());
    assert_eq!(socket.state(), SocketState::Unconnected);
    assert!(socket.error().is_none());
    assert!(socket.is_sequential());
    assert!(!socket.is_open());
    assert!(socket.manufacturer().is_none());
    assert!(socket.deadline().is_none());
    assert_eq!(socket.bytes_available(), 0);
}

#[test]
fn test_connect_ignored_unless_unconnected() {
    let (mut socket, _link, mut events) = socket_for(&LAIRD, SocketConfig::default());
    socket.connect(&());
    socket.connect(&());
    assert_eq!(socket.transport().requests(), &[Request::Connect]);
    assert_eq!(
        drain(&mut events),
        vec![SocketEvent::StateChanged(SocketState::Connecting)]
    );
}

#[test]
fn test_mismatched_acks_are_ignored() {
    let (mut socket, link, _events) = socket_for(&LAIRD, SocketConfig::default());
    socket.connect(&());

    // 还没有连接就来的发现结果
    socket.handle_event(TransportEvent::DiscoveryFinished);
    assert_eq!(socket.transport().requests(), &[Request::Connect]);

    socket.handle_event(TransportEvent::Connected);
    socket.handle_event(TransportEvent::DiscoveryFinished);
    socket.handle_event(TransportEvent::ServiceDiscovered(BLUERADIOS.service_id));
    assert_eq!(
        socket.transport().last_request(),
        Some(&Request::DiscoverDetails(LAIRD.service_id))
    );

    socket.handle_event(TransportEvent::ServiceDiscovered(LAIRD.service_id));
    socket.transport_mut().take_requests();

    // 顺序颠倒的 CCCD 确认、关闭通知的确认都不推进握手
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.modem_out_notify,
        NOTIFY_ON.to_vec(),
    ));
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.tx_fifo_notify,
        NOTIFY_OFF.to_vec(),
    ));
    assert!(socket.transport().requests().is_empty());

    socket.handle_event(TransportEvent::DescriptorWritten(
        link.tx_fifo_notify,
        NOTIFY_ON.to_vec(),
    ));
    assert_eq!(
        socket.transport().requests(),
        &[Request::WriteDescriptor(
            link.modem_out_notify,
            NOTIFY_ON.to_vec()
        )]
    );
}

#[test]
fn test_rts_clear_ack_does_not_open() {
    let (mut socket, link, _events) = socket_for(&LAIRD, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.modem_out_notify,
        NOTIFY_ON.to_vec(),
    ));
    assert!(socket.rts());

    socket.handle_event(TransportEvent::CharacteristicWritten(link.modem_in, vec![0x00]));
    assert_eq!(
        socket.transport().last_request(),
        Some(&Request::WriteCharacteristic(link.modem_in, vec![0x01]))
    );
}

#[test]
fn test_data_during_handshake_is_buffered() {
    let (mut socket, link, mut events) = socket_for(&BLUERADIOS, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);

    socket.handle_event(TransportEvent::CharacteristicChanged(link.tx_fifo, b"hi".to_vec()));
    assert_eq!(socket.bytes_available(), 2);
    assert!(!drain(&mut events).contains(&SocketEvent::ReadyRead));

    // 握手完成前不可读
    let mut buf = [0u8; 2];
    assert_eq!(
        socket.read(&mut buf),
        Err(VspError::NotConnected("read"))
    );

    finish(&mut socket, &link);
    let events = drain(&mut events);
    assert!(events.ends_with(&[SocketEvent::Connected, SocketEvent::ReadyRead]));
    assert_eq!(socket.read(&mut buf), Ok(2));
    assert_eq!(&buf, b"hi");
}

#[test]
fn test_cts_notification_before_initial_read() {
    let (mut socket, link, _events) = socket_for(&LAIRD, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    socket.handle_event(TransportEvent::DescriptorWritten(
        link.modem_out_notify,
        NOTIFY_ON.to_vec(),
    ));
    socket.handle_event(TransportEvent::CharacteristicChanged(link.modem_out, vec![0x01]));
    assert!(socket.cts());
    assert_eq!(socket.state(), SocketState::Connecting);
}

#[test]
fn test_handshake_error_stalls_until_close() {
    let (mut socket, link, mut events) = socket_for(&LAIRD, SocketConfig::default());
    socket.connect(&());
    socket.handle_event(TransportEvent::Error {
        fault: TransportFault::Controller,
        detail: "Connection refused".to_string(),
    });
    assert_eq!(socket.state(), SocketState::Connecting);
    assert_eq!(socket.error(), Some(ErrorKind::OperationError));
    assert!(drain(&mut events).contains(&SocketEvent::Error(VspError::Operation(
        "Connection refused".to_string()
    ))));

    // 错误后的事件不会让握手继续
    socket.handle_event(TransportEvent::Connected);
    socket.handle_event(TransportEvent::DiscoveryFinished);
    socket.handle_event(TransportEvent::ServiceDiscovered(link.profile.service_id));
    assert_eq!(socket.transport().requests(), &[Request::Connect]);
    assert!(socket.manufacturer().is_none());

    socket.close();
    assert_eq!(socket.state(), SocketState::Unconnected);
}

#[test]
fn test_no_compatible_service_stalls() {
    let mut socket = VspSocket::new(RecordingTransport::new());
    socket.connect(&());
    socket.handle_event(TransportEvent::Connected);
    socket.handle_event(TransportEvent::DiscoveryFinished);
    assert_eq!(socket.error(), Some(ErrorKind::NoCompatibleService));
    assert!(matches!(
        socket.session.as_ref().map(|s| &s.phase),
        Some(handshake::Phase::Stalled)
    ));
}

#[test]
fn test_manufacturer_known_after_discovery() {
    let (mut socket, _link, _events) = socket_for(&BLUERADIOS, SocketConfig::default());
    socket.connect(&());
    socket.handle_event(TransportEvent::Connected);
    assert!(socket.manufacturer().is_none());
    socket.handle_event(TransportEvent::DiscoveryFinished);
    assert_eq!(socket.manufacturer(), Some(Manufacturer::BlueRadios));
}

#[test]
fn test_handshake_deadline() {
    let config = SocketConfig::default().with_handshake_timeout(Duration::from_millis(250));
    let (mut socket, _link, mut events) = socket_for(&LAIRD, config);

    assert!(!socket.poll_deadline(Instant::now()));
    socket.connect(&());
    let deadline = socket.deadline().unwrap();

    assert!(!socket.poll_deadline(deadline - Duration::from_millis(1)));
    assert_eq!(socket.state(), SocketState::Connecting);

    assert!(socket.poll_deadline(deadline));
    assert_eq!(socket.state(), SocketState::Unconnected);
    assert_eq!(socket.error(), Some(ErrorKind::HandshakeTimeout));
    assert_eq!(socket.transport().last_request(), Some(&Request::Disconnect));

    let events = drain(&mut events);
    assert_eq!(
        events[1],
        SocketEvent::Error(VspError::HandshakeTimeout(250))
    );
    assert_eq!(events.last(), Some(&SocketEvent::Disconnected));
}

#[test]
fn test_deadline_cleared_once_open() {
    let config = SocketConfig::default().with_handshake_timeout(Duration::from_secs(1));
    let (mut socket, link, _events) = socket_for(&LAIRD, config);
    reach_modem_notify(&mut socket, &link);
    finish(&mut socket, &link);

    assert_eq!(socket.state(), SocketState::Connected);
    assert!(socket.deadline().is_none());
    assert!(!socket.poll_deadline(Instant::now() + Duration::from_secs(60)));
    assert_eq!(socket.state(), SocketState::Connected);
}

#[test]
fn test_no_deadline_by_default() {
    let (mut socket, _link, _events) = socket_for(&LAIRD, SocketConfig::default());
    socket.connect(&());
    assert!(socket.deadline().is_none());
    assert!(!socket.poll_deadline(Instant::now() + Duration::from_secs(3600)));
}

#[test]
fn test_io_read_would_block() {
    let (mut socket, link, _events) = socket_for(&LAIRD, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    finish(&mut socket, &link);

    let mut buf = [0u8; 8];
    let err = Read::read(&mut socket, &mut buf).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

    socket.handle_event(TransportEvent::CharacteristicChanged(link.tx_fifo, b"xyz".to_vec()));
    assert_eq!(Read::read(&mut socket, &mut buf).unwrap(), 3);
}

#[test]
fn test_io_errors_map_kinds() {
    let mut socket = VspSocket::new(RecordingTransport::new());
    let err = Write::write(&mut socket, b"x").unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
}

#[test]
fn test_io_write_full_buffer_would_block() {
    let config = SocketConfig::default().with_max_buffer_size(32);
    let (mut socket, link, _events) = socket_for(&LAIRD, config);
    reach_modem_notify(&mut socket, &link);
    finish(&mut socket, &link);

    Write::write_all(&mut socket, &[0x11; 30]).unwrap();
    let err = Write::write(&mut socket, &[0x22; 4]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

    // 确认一个数据包后有了空间
    socket.handle_event(TransportEvent::CharacteristicWritten(link.rx_fifo, vec![0x11; 20]));
    assert_eq!(Write::write(&mut socket, &[0x22; 4]).unwrap(), 4);
}

#[test]
fn test_io_write_and_flush() {
    let (mut socket, link, mut events) = socket_for(&LAIRD, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    finish(&mut socket, &link);
    socket.transport_mut().take_requests();

    Write::write_all(&mut socket, &[0x42; 25]).unwrap();
    Write::flush(&mut socket).unwrap();
    assert_eq!(socket.transport().characteristic_writes(&link.rx_fifo).len(), 1);

    socket.handle_event(TransportEvent::CharacteristicWritten(link.rx_fifo, vec![0x42; 20]));
    assert_eq!(
        socket.transport().characteristic_writes(&link.rx_fifo),
        vec![vec![0x42; 20], vec![0x42; 5]]
    );
    assert!(drain(&mut events).contains(&SocketEvent::BytesWritten(20)));
}

#[test]
fn test_force_unready_and_try_ready() {
    let (mut socket, link, _events) = socket_for(&BLUERADIOS, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    finish(&mut socket, &link);
    socket.transport_mut().take_requests();

    socket.force_unready();
    assert!(!socket.rts());
    assert!(socket.try_ready());
    assert!(socket.rts());
    assert_eq!(
        socket.transport().characteristic_writes(&link.modem_in),
        vec![vec![0x01], vec![0x00]]
    );
}

#[test]
fn test_events_after_close_are_dropped() {
    let (mut socket, link, mut events) = socket_for(&LAIRD, SocketConfig::default());
    reach_modem_notify(&mut socket, &link);
    socket.close();
    drain(&mut events);

    socket.handle_event(TransportEvent::CharacteristicChanged(link.tx_fifo, vec![1]));
    socket.handle_event(TransportEvent::Error {
        fault: TransportFault::Controller,
        detail: "BLE link lost".to_string(),
    });
    assert!(drain(&mut events).is_empty());
    assert_eq!(socket.bytes_available(), 0);
    assert!(socket.error().is_none());
}

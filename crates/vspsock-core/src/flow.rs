//! RTS/CTS 流控
//!
//! - RTS (modem-in, 本端写)：本端还能继续接收数据
//! - CTS (modem-out, 对端通知)：对端还能继续接收数据
//!
//! 两个标志都只占 1 字节，置位/清除的取值由厂商决定（见 [`crate::profile`]）。

use crate::link::Link;
use crate::profile::ManufacturerProfile;
use crate::transport::Transport;
use log::debug;

/// 解码 modem 特征值：仅当恰好是 1 字节的“置位”值时为 true
pub fn decode_rts_byte(profile: &ManufacturerProfile, value: &[u8]) -> bool {
    value == [profile.rts_set_byte]
}

pub fn encode_rts_byte(profile: &ManufacturerProfile, ready: bool) -> u8 {
    if ready {
        profile.rts_set_byte
    } else {
        profile.rts_clear_byte
    }
}

/// 流控状态，每次连接新建
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowControl {
    rts: bool,
    cts: bool,
}

impl FlowControl {
    pub fn rts(&self) -> bool {
        self.rts
    }

    pub fn cts(&self) -> bool {
        self.cts
    }

    /// 修改本端 RTS 并写入 modem-in
    ///
    /// 即使值未变化也会发出写请求，保证对端总是看到最新的意图。
    pub fn set_local_ready<T: Transport + ?Sized>(
        &mut self,
        ready: bool,
        link: &Link,
        transport: &mut T,
    ) {
        let byte = encode_rts_byte(link.profile, ready);
        debug!("RTS {} (0x{:02x})", if ready { "set" } else { "clear" }, byte);
        self.rts = ready;
        transport.write_characteristic(&link.modem_in, &[byte]);
    }

    /// 更新对端 CTS，返回是否从 false 变为 true
    pub fn on_remote_ready_changed(&mut self, cts: bool) -> bool {
        let resumed = cts && !self.cts;
        self.cts = cts;
        resumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BLUERADIOS, LAIRD};
    use crate::transport::mock::RecordingTransport;

    #[test]
    fn test_encode_decode_laird() {
        assert_eq!(encode_rts_byte(&LAIRD, true), 0x01);
        assert_eq!(encode_rts_byte(&LAIRD, false), 0x00);
        assert!(decode_rts_byte(&LAIRD, &[0x01]));
        assert!(!decode_rts_byte(&LAIRD, &[0x00]));
    }

    #[test]
    fn test_encode_decode_blueradios_inverted() {
        assert_eq!(encode_rts_byte(&BLUERADIOS, true), 0x00);
        assert_eq!(encode_rts_byte(&BLUERADIOS, false), 0x01);
        assert!(decode_rts_byte(&BLUERADIOS, &[0x00]));
        assert!(!decode_rts_byte(&BLUERADIOS, &[0x01]));
    }

    #[test]
    fn test_decode_rejects_other_lengths() {
        assert!(!decode_rts_byte(&LAIRD, &[]));
        assert!(!decode_rts_byte(&LAIRD, &[0x01, 0x00]));
    }

    #[test]
    fn test_remote_ready_transition() {
        let mut flow = FlowControl::default();
        assert!(flow.on_remote_ready_changed(true));
        // 已经是 true，不算恢复
        assert!(!flow.on_remote_ready_changed(true));
        assert!(!flow.on_remote_ready_changed(false));
        assert!(!flow.cts());
    }

    #[test]
    fn test_set_local_ready_always_writes() {
        let mut transport = RecordingTransport::with_profile(&LAIRD);
        let link = transport.resolve_link(&LAIRD).unwrap();
        let mut flow = FlowControl::default();

        flow.set_local_ready(false, &link, &mut transport);
        flow.set_local_ready(false, &link, &mut transport);
        flow.set_local_ready(true, &link, &mut transport);

        assert!(flow.rts());
        assert_eq!(
            transport.characteristic_writes(&link.modem_in),
            vec![vec![0x00], vec![0x00], vec![0x01]]
        );
    }
}

//! 厂商 VSP 配置表
//!
//! 两种厂商实现使用不同的 UUID 集合和相反的 RTS/CTS 位极性：
//!
//! | 厂商       | 服务 UUID                              | 置位 | 清除 | 数据模式特征 |
//! |------------|----------------------------------------|------|------|--------------|
//! | Laird      | `569a1101-b87f-490c-92cb-11ba5ea5167c` | 0x01 | 0x00 | 无           |
//! | BlueRadios | `da2b84f1-6279-48de-bdc0-afbea0226079` | 0x00 | 0x01 | `a87988b9-…` |

use std::fmt;
use uuid::Uuid;

/// 单个 BLE 数据包的最大有效载荷（BLE 默认 ATT MTU 23 - 3）
pub const PACKET_SIZE: usize = 20;

/// Client Characteristic Configuration 描述符 (0x2902)
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD 开启通知
pub const NOTIFY_ON: [u8; 2] = [0x01, 0x00];
/// CCCD 关闭通知
pub const NOTIFY_OFF: [u8; 2] = [0x00, 0x00];

/// BlueRadios 切换到数据模式时写入的值
pub const DATA_MODE: [u8; 1] = [0x01];

pub const LAIRD_SERVICE_UUID: Uuid = Uuid::from_u128(0x569a1101_b87f_490c_92cb_11ba5ea5167c);
pub const BLUERADIOS_SERVICE_UUID: Uuid = Uuid::from_u128(0xda2b84f1_6279_48de_bdc0_afbea0226079);
pub const BLUERADIOS_MODE_CHAR_UUID: Uuid =
    Uuid::from_u128(0xa87988b9_694c_479c_900e_95dfa6c00a24);

/// 厂商
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manufacturer {
    Laird,
    BlueRadios,
}

impl Manufacturer {
    pub fn name(&self) -> &'static str {
        match self {
            Manufacturer::Laird => "Laird",
            Manufacturer::BlueRadios => "BlueRadios",
        }
    }

    pub fn profile(&self) -> &'static ManufacturerProfile {
        match self {
            Manufacturer::Laird => &LAIRD,
            Manufacturer::BlueRadios => &BLUERADIOS,
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 一种厂商 VSP 服务的特征集合和流控编码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerProfile {
    pub manufacturer: Manufacturer,
    pub service_id: Uuid,
    /// 客户端 -> 外设 (Client TX)
    pub rx_fifo_id: Uuid,
    /// 外设 -> 客户端 (Client RX)，notify
    pub tx_fifo_id: Uuid,
    /// 本端 RTS
    pub modem_in_id: Uuid,
    /// 对端 CTS，notify
    pub modem_out_id: Uuid,
    pub mode_switch_id: Option<Uuid>,
    pub rts_set_byte: u8,
    pub rts_clear_byte: u8,
}

impl ManufacturerProfile {
    /// 四个必需的数据通道特征
    pub fn data_path_ids(&self) -> [Uuid; 4] {
        [
            self.rx_fifo_id,
            self.tx_fifo_id,
            self.modem_in_id,
            self.modem_out_id,
        ]
    }
}

pub static LAIRD: ManufacturerProfile = ManufacturerProfile {
    manufacturer: Manufacturer::Laird,
    service_id: LAIRD_SERVICE_UUID,
    rx_fifo_id: Uuid::from_u128(0x569a2001_b87f_490c_92cb_11ba5ea5167c),
    tx_fifo_id: Uuid::from_u128(0x569a2000_b87f_490c_92cb_11ba5ea5167c),
    modem_in_id: Uuid::from_u128(0x569a2003_b87f_490c_92cb_11ba5ea5167c),
    modem_out_id: Uuid::from_u128(0x569a2002_b87f_490c_92cb_11ba5ea5167c),
    mode_switch_id: None,
    rts_set_byte: 0x01,
    rts_clear_byte: 0x00,
};

pub static BLUERADIOS: ManufacturerProfile = ManufacturerProfile {
    manufacturer: Manufacturer::BlueRadios,
    service_id: BLUERADIOS_SERVICE_UUID,
    rx_fifo_id: Uuid::from_u128(0xbf03260c_7205_4c25_af43_93b1c299d159),
    tx_fifo_id: Uuid::from_u128(0x18cda784_4bd3_4370_85bb_bfed91ec86af),
    modem_in_id: Uuid::from_u128(0x0a1934f5_24b8_4f13_9842_37bb167c6aff),
    modem_out_id: Uuid::from_u128(0xfdd6b4d3_046d_4330_bdec_1fd0c90cb43b),
    mode_switch_id: Some(BLUERADIOS_MODE_CHAR_UUID),
    rts_set_byte: 0x00,
    rts_clear_byte: 0x01,
};

/// 所有已知的配置
pub static PROFILES: [&ManufacturerProfile; 2] = [&LAIRD, &BLUERADIOS];

/// 按服务 UUID 查找配置
pub fn resolve(service_id: &Uuid) -> Option<&'static ManufacturerProfile> {
    PROFILES
        .iter()
        .copied()
        .find(|profile| profile.service_id == *service_id)
}

/// 按发现顺序返回第一个可识别的服务
pub fn first_compatible<'a, I>(service_ids: I) -> Option<&'static ManufacturerProfile>
where
    I: IntoIterator<Item = &'a Uuid>,
{
    service_ids.into_iter().find_map(resolve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_services() {
        assert_eq!(
            resolve(&LAIRD_SERVICE_UUID).map(|p| p.manufacturer),
            Some(Manufacturer::Laird)
        );
        assert_eq!(
            resolve(&BLUERADIOS_SERVICE_UUID).map(|p| p.manufacturer),
            Some(Manufacturer::BlueRadios)
        );
    }

    #[test]
    fn test_resolve_unknown_service() {
        let nus = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
        assert!(resolve(&nus).is_none());
    }

    #[test]
    fn test_first_compatible_keeps_discovery_order() {
        let generic_access = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
        let ids = [generic_access, BLUERADIOS_SERVICE_UUID, LAIRD_SERVICE_UUID];
        let profile = first_compatible(&ids).unwrap();
        assert_eq!(profile.manufacturer, Manufacturer::BlueRadios);
    }

    #[test]
    fn test_uuid_strings() {
        // 与厂商文档中的大小写无关
        assert_eq!(
            BLUERADIOS.modem_in_id.to_string(),
            "0a1934f5-24b8-4f13-9842-37bb167c6aff"
        );
        assert_eq!(
            LAIRD.tx_fifo_id.to_string(),
            "569a2000-b87f-490c-92cb-11ba5ea5167c"
        );
    }

    #[test]
    fn test_only_blueradios_has_mode_switch() {
        assert!(LAIRD.mode_switch_id.is_none());
        assert_eq!(BLUERADIOS.mode_switch_id, Some(BLUERADIOS_MODE_CHAR_UUID));
    }

    #[test]
    fn test_id_sets_are_disjoint() {
        for a in LAIRD.data_path_ids() {
            assert!(!BLUERADIOS.data_path_ids().contains(&a));
        }
    }

    #[test]
    fn test_inverted_polarity() {
        assert_eq!(LAIRD.rts_set_byte, BLUERADIOS.rts_clear_byte);
        assert_eq!(LAIRD.rts_clear_byte, BLUERADIOS.rts_set_byte);
    }
}

//! 已解析的 VSP 链路：选定的厂商配置加上全部特征/描述符句柄

use crate::error::VspError;
use crate::profile::{CCCD_UUID, ManufacturerProfile};
use crate::transport::{CharacteristicHandle, DescriptorHandle, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub profile: &'static ManufacturerProfile,
    pub rx_fifo: CharacteristicHandle,
    pub tx_fifo: CharacteristicHandle,
    pub modem_in: CharacteristicHandle,
    pub modem_out: CharacteristicHandle,
    pub mode_switch: Option<CharacteristicHandle>,
    pub tx_fifo_notify: DescriptorHandle,
    pub modem_out_notify: DescriptorHandle,
}

impl Link {
    /// 在服务详情发现完成后解析所有句柄
    ///
    /// 先检查四个必需特征（以及 BlueRadios 的数据模式特征），再检查两个 CCCD。
    pub fn resolve<T: Transport + ?Sized>(
        profile: &'static ManufacturerProfile,
        transport: &T,
    ) -> Result<Self, VspError> {
        let service = profile.service_id;
        let fetch = |id| {
            transport
                .characteristic(service, id)
                .ok_or(VspError::MissingCharacteristic(id))
        };

        let rx_fifo = fetch(profile.rx_fifo_id)?;
        let tx_fifo = fetch(profile.tx_fifo_id)?;
        let modem_in = fetch(profile.modem_in_id)?;
        let modem_out = fetch(profile.modem_out_id)?;
        let mode_switch = profile.mode_switch_id.map(fetch).transpose()?;

        let notify = |handle: &CharacteristicHandle| {
            transport
                .descriptor(handle, CCCD_UUID)
                .ok_or(VspError::MissingNotificationDescriptor(handle.uuid))
        };
        let tx_fifo_notify = notify(&tx_fifo)?;
        let modem_out_notify = notify(&modem_out)?;

        Ok(Self {
            profile,
            rx_fifo,
            tx_fifo,
            modem_in,
            modem_out,
            mode_switch,
            tx_fifo_notify,
            modem_out_notify,
        })
    }
}

//! 记录型传输层
//!
//! 不产生任何完成事件，只记录 socket 发出的请求；测试代码再手动把
//! 对应的 [`TransportEvent`](super::TransportEvent) 送回 socket。

use super::{CharacteristicHandle, DescriptorHandle, Transport};
use crate::error::VspError;
use crate::link::Link;
use crate::profile::{CCCD_UUID, ManufacturerProfile};
use std::collections::BTreeSet;
use uuid::Uuid;

/// socket 发出的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect,
    DiscoverServices,
    DiscoverDetails(Uuid),
    WriteCharacteristic(CharacteristicHandle, Vec<u8>),
    ReadCharacteristic(CharacteristicHandle),
    WriteDescriptor(DescriptorHandle, Vec<u8>),
    Disconnect,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    services: Vec<Uuid>,
    characteristics: BTreeSet<CharacteristicHandle>,
    descriptors: BTreeSet<DescriptorHandle>,
    requests: Vec<Request>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 暴露一个完整的 VSP 服务（所有特征和 CCCD）
    pub fn with_profile(profile: &ManufacturerProfile) -> Self {
        let mut transport = Self::new();
        transport.add_service(profile.service_id);
        let ids = profile
            .data_path_ids()
            .into_iter()
            .chain(profile.mode_switch_id);
        for id in ids {
            transport.add_characteristic(profile.service_id, id);
        }
        transport.add_descriptor(profile.service_id, profile.tx_fifo_id, CCCD_UUID);
        transport.add_descriptor(profile.service_id, profile.modem_out_id, CCCD_UUID);
        transport
    }

    pub fn add_service(&mut self, service: Uuid) {
        self.services.push(service);
    }

    pub fn add_characteristic(&mut self, service: Uuid, id: Uuid) {
        self.characteristics
            .insert(CharacteristicHandle::new(service, id));
    }

    pub fn add_descriptor(&mut self, service: Uuid, characteristic: Uuid, id: Uuid) {
        let handle = CharacteristicHandle::new(service, characteristic);
        self.descriptors.insert(DescriptorHandle::new(handle, id));
    }

    pub fn without_characteristic(mut self, id: Uuid) -> Self {
        self.characteristics.retain(|c| c.uuid != id);
        self.descriptors.retain(|d| d.characteristic.uuid != id);
        self
    }

    pub fn without_descriptor(mut self, characteristic: Uuid) -> Self {
        self.descriptors
            .retain(|d| d.characteristic.uuid != characteristic);
        self
    }

    /// 按 socket 的方式解析一条链路，便于测试构造事件
    pub fn resolve_link(&self, profile: &'static ManufacturerProfile) -> Result<Link, VspError> {
        Link::resolve(profile, self)
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    pub fn last_request(&self) -> Option<&Request> {
        self.requests.last()
    }

    /// 对某个特征的全部写入，按发出顺序
    pub fn characteristic_writes(&self, handle: &CharacteristicHandle) -> Vec<Vec<u8>> {
        self.requests
            .iter()
            .filter_map(|request| match request {
                Request::WriteCharacteristic(h, value) if h == handle => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    type Device = ();

    fn connect(&mut self, _device: &()) {
        self.requests.push(Request::Connect);
    }

    fn discover_services(&mut self) {
        self.requests.push(Request::DiscoverServices);
    }

    fn service_ids(&self) -> Vec<Uuid> {
        self.services.clone()
    }

    fn discover_details(&mut self, service: Uuid) {
        self.requests.push(Request::DiscoverDetails(service));
    }

    fn characteristic(&self, service: Uuid, id: Uuid) -> Option<CharacteristicHandle> {
        let handle = CharacteristicHandle::new(service, id);
        self.characteristics.contains(&handle).then_some(handle)
    }

    fn descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        config_id: Uuid,
    ) -> Option<DescriptorHandle> {
        let handle = DescriptorHandle::new(*characteristic, config_id);
        self.descriptors.contains(&handle).then_some(handle)
    }

    fn write_characteristic(&mut self, handle: &CharacteristicHandle, value: &[u8]) {
        self.requests
            .push(Request::WriteCharacteristic(*handle, value.to_vec()));
    }

    fn read_characteristic(&mut self, handle: &CharacteristicHandle) {
        self.requests.push(Request::ReadCharacteristic(*handle));
    }

    fn write_descriptor(&mut self, handle: &DescriptorHandle, value: &[u8]) {
        self.requests
            .push(Request::WriteDescriptor(*handle, value.to_vec()));
    }

    fn disconnect(&mut self) {
        self.requests.push(Request::Disconnect);
    }
}

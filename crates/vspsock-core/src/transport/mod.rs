//! BLE 传输层抽象
//!
//! socket 只通过 [`Transport`] 发起请求；每个请求的完成结果以
//! [`TransportEvent`] 的形式送回 [`VspSocket::handle_event`](crate::VspSocket::handle_event)。
//! 每次调用恰好对应一个完成事件（或一个 `Error` 事件）。

pub mod btle;
pub mod mock;

use crate::error::VspError;
use std::fmt;
use uuid::Uuid;

/// 已发现的特征句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
}

impl CharacteristicHandle {
    pub fn new(service: Uuid, uuid: Uuid) -> Self {
        Self { service, uuid }
    }
}

impl fmt::Display for CharacteristicHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

/// 特征下的描述符句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle {
    pub characteristic: CharacteristicHandle,
    pub uuid: Uuid,
}

impl DescriptorHandle {
    pub fn new(characteristic: CharacteristicHandle, uuid: Uuid) -> Self {
        Self {
            characteristic,
            uuid,
        }
    }
}

/// 传输层报告的故障类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// 控制器级别故障（连接失败、链路断开）
    Controller,
    CharacteristicWrite,
    CharacteristicRead,
    DescriptorWrite,
    DescriptorRead,
    Unknown,
}

impl TransportFault {
    pub fn into_error(self, detail: String) -> VspError {
        match self {
            TransportFault::Controller => VspError::Operation(detail),
            TransportFault::CharacteristicWrite => VspError::CharacteristicWrite(detail),
            TransportFault::CharacteristicRead => VspError::CharacteristicRead(detail),
            TransportFault::DescriptorWrite => VspError::DescriptorWrite(detail),
            TransportFault::DescriptorRead => VspError::DescriptorRead(detail),
            TransportFault::Unknown => VspError::Unknown(detail),
        }
    }
}

/// 传输层完成事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    DiscoveryFinished,
    /// 服务的特征和描述符已就绪
    ServiceDiscovered(Uuid),
    CharacteristicWritten(CharacteristicHandle, Vec<u8>),
    CharacteristicRead(CharacteristicHandle, Vec<u8>),
    CharacteristicChanged(CharacteristicHandle, Vec<u8>),
    DescriptorWritten(DescriptorHandle, Vec<u8>),
    /// 特征写入失败；带句柄，便于区分数据包和 RTS 写入
    CharacteristicWriteFailed(CharacteristicHandle, String),
    Error {
        fault: TransportFault,
        detail: String,
    },
}

impl TransportEvent {
    /// 失败事件对应的 socket 错误，成功事件返回 None
    pub fn error(&self) -> Option<VspError> {
        match self {
            TransportEvent::CharacteristicWriteFailed(_, detail) => {
                Some(VspError::CharacteristicWrite(detail.clone()))
            }
            TransportEvent::Error { fault, detail } => Some(fault.into_error(detail.clone())),
            _ => None,
        }
    }
}

/// BLE 传输层
///
/// 所有 `write_*` / `read_*` / `discover_*` 方法只负责发起请求，不等待结果。
pub trait Transport {
    /// 连接目标（例如 btleplug 的 `Peripheral`）
    type Device;

    fn connect(&mut self, device: &Self::Device);

    fn discover_services(&mut self);

    /// 已发现的服务，按发现顺序
    fn service_ids(&self) -> Vec<Uuid>;

    fn discover_details(&mut self, service: Uuid);

    fn characteristic(&self, service: Uuid, id: Uuid) -> Option<CharacteristicHandle>;

    fn descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        config_id: Uuid,
    ) -> Option<DescriptorHandle>;

    fn write_characteristic(&mut self, handle: &CharacteristicHandle, value: &[u8]);

    fn read_characteristic(&mut self, handle: &CharacteristicHandle);

    fn write_descriptor(&mut self, handle: &DescriptorHandle, value: &[u8]);

    fn disconnect(&mut self);
}

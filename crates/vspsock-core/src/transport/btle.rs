//! 基于 btleplug 的传输层
//!
//! 每次连接启动一个 tokio 任务，按顺序执行请求并把完成事件写入
//! `mpsc` 通道，调用方再把事件交给 socket：
//!
//! ```ignore
//! let (transport, mut events) = BtleplugTransport::new();
//! let mut socket = VspSocket::new(transport);
//! socket.connect(&peripheral);
//! while let Some(event) = events.recv().await {
//!     socket.handle_event(event);
//! }
//! ```
//!
//! # 平台差异
//!
//! - btleplug 在 `discover_services` 时就发现了全部特征和描述符，
//!   `discover_details` 直接完成
//! - 对 CCCD 的写入映射为 `subscribe` / `unsubscribe`，否则部分平台不会
//!   投递通知
//! - 服务列表按 UUID 排序，而不是外设上的顺序
//!
//! # 重新连接
//!
//! 每次 `connect()` 开始一个新的连接代次，`disconnect()` 立即结束当前代次。
//! 旧任务迟到的事件直接丢弃；新任务要等旧任务断开外设后才开始连接。

use super::{CharacteristicHandle, DescriptorHandle, Transport, TransportEvent, TransportFault};
use crate::profile::{CCCD_UUID, NOTIFY_OFF};
use btleplug::api::{
    CharPropFlags, Characteristic, Peripheral as _, Service, ValueNotification, WriteType,
};
use btleplug::platform::Peripheral;
use futures_util::{Stream, StreamExt};
use log::{debug, trace, warn};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

#[derive(Debug)]
enum Request {
    DiscoverServices,
    DiscoverDetails(Uuid),
    WriteCharacteristic(CharacteristicHandle, Vec<u8>),
    ReadCharacteristic(CharacteristicHandle),
    WriteDescriptor(DescriptorHandle, Vec<u8>),
    Disconnect,
}

/// 已发现的 GATT 服务快照，供同步查询使用
#[derive(Debug, Clone, Default)]
struct ServiceCache(Arc<Mutex<Vec<Service>>>);

impl ServiceCache {
    fn lock(&self) -> MutexGuard<'_, Vec<Service>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, services: Vec<Service>) {
        *self.lock() = services;
    }

    fn characteristic(&self, service: Uuid, id: Uuid) -> Option<Characteristic> {
        self.lock()
            .iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == id)
            .cloned()
    }

    /// 通知只带特征 UUID，取第一个匹配的服务
    fn handle_for(&self, id: Uuid) -> Option<CharacteristicHandle> {
        self.lock().iter().find_map(|s| {
            s.characteristics
                .iter()
                .any(|c| c.uuid == id)
                .then(|| CharacteristicHandle::new(s.uuid, id))
        })
    }
}

/// 只转发当前连接代次的事件
#[derive(Debug, Clone)]
struct EventSink {
    events: mpsc::UnboundedSender<TransportEvent>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl EventSink {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn emit(&self, event: TransportEvent) {
        if self.is_current() {
            let _ = self.events.send(event);
        } else {
            trace!("Dropping event from stale connection: {:?}", event);
        }
    }
}

pub struct BtleplugTransport {
    requests: Option<mpsc::UnboundedSender<Request>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    services: ServiceCache,
    generation: Arc<AtomicU64>,
    /// 最近一次连接的后台任务
    worker: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    /// 返回传输层和它的完成事件接收端
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            requests: None,
            events,
            services: ServiceCache::default(),
            generation: Arc::new(AtomicU64::new(0)),
            worker: None,
        };
        (transport, rx)
    }

    /// 开始新的连接代次
    fn next_sink(&self) -> EventSink {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        EventSink {
            events: self.events.clone(),
            current: Arc::clone(&self.generation),
            generation,
        }
    }

    fn send(&self, request: Request) {
        let Some(requests) = &self.requests else {
            warn!("Transport request {:?} issued while not connected", request);
            return;
        };
        if requests.send(request).is_err() {
            let _ = self.events.send(TransportEvent::Error {
                fault: TransportFault::Controller,
                detail: "BLE connection task has stopped".to_string(),
            });
        }
    }
}

impl Transport for BtleplugTransport {
    type Device = Peripheral;

    /// 必须在 tokio runtime 中调用
    fn connect(&mut self, device: &Peripheral) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.requests = Some(tx);
        self.services.replace(Vec::new());

        let worker = Worker {
            peripheral: device.clone(),
            sink: self.next_sink(),
            services: self.services.clone(),
        };
        let previous = self.worker.take();
        self.worker = Some(tokio::spawn(worker.run(rx, previous)));
    }

    fn discover_services(&mut self) {
        self.send(Request::DiscoverServices);
    }

    fn service_ids(&self) -> Vec<Uuid> {
        self.services.lock().iter().map(|s| s.uuid).collect()
    }

    fn discover_details(&mut self, service: Uuid) {
        self.send(Request::DiscoverDetails(service));
    }

    fn characteristic(&self, service: Uuid, id: Uuid) -> Option<CharacteristicHandle> {
        self.services
            .characteristic(service, id)
            .map(|c| CharacteristicHandle::new(c.service_uuid, c.uuid))
    }

    fn descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        config_id: Uuid,
    ) -> Option<DescriptorHandle> {
        let found = self
            .services
            .characteristic(characteristic.service, characteristic.uuid)?;
        found
            .descriptors
            .iter()
            .any(|d| d.uuid == config_id)
            .then(|| DescriptorHandle::new(*characteristic, config_id))
    }

    fn write_characteristic(&mut self, handle: &CharacteristicHandle, value: &[u8]) {
        self.send(Request::WriteCharacteristic(*handle, value.to_vec()));
    }

    fn read_characteristic(&mut self, handle: &CharacteristicHandle) {
        self.send(Request::ReadCharacteristic(*handle));
    }

    fn write_descriptor(&mut self, handle: &DescriptorHandle, value: &[u8]) {
        self.send(Request::WriteDescriptor(*handle, value.to_vec()));
    }

    fn disconnect(&mut self) {
        self.send(Request::Disconnect);
        self.requests = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// 单个连接的后台任务
struct Worker {
    peripheral: Peripheral,
    sink: EventSink,
    services: ServiceCache,
}

impl Worker {
    async fn run(
        self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            debug!("Waiting for the previous connection to shut down");
            let _ = previous.await;
        }
        if !self.sink.is_current() {
            debug!("Connection closed before it started");
            return;
        }

        let mut notifications = match self.peripheral.connect().await {
            Ok(()) => {
                debug!("BLE link established");
                self.emit(TransportEvent::Connected);
                self.open_notifications().await
            }
            Err(e) => {
                self.fail(TransportFault::Controller, e);
                None
            }
        };

        loop {
            let mut stream_ended = false;
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Disconnect) | None => break,
                    Some(request) => self.execute(request).await,
                },
                notification = next_notification(&mut notifications) => match notification {
                    Some(notification) => self.forward(notification),
                    None => stream_ended = true,
                },
            }
            if stream_ended {
                notifications = None;
                self.fail(TransportFault::Controller, "BLE link lost");
            }
        }

        if let Err(e) = self.peripheral.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
        debug!("BLE connection task finished");
    }

    async fn open_notifications(&self) -> Option<NotificationStream> {
        match self.peripheral.notifications().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                self.fail(TransportFault::Controller, e);
                None
            }
        }
    }

    async fn execute(&self, request: Request) {
        trace!("Executing {:?}", request);
        match request {
            Request::DiscoverServices => match self.peripheral.discover_services().await {
                Ok(()) => {
                    if self.sink.is_current() {
                        self.services
                            .replace(self.peripheral.services().into_iter().collect());
                    }
                    self.emit(TransportEvent::DiscoveryFinished);
                }
                Err(e) => self.fail(TransportFault::Controller, e),
            },
            Request::DiscoverDetails(service) => {
                if self.services.lock().iter().any(|s| s.uuid == service) {
                    self.emit(TransportEvent::ServiceDiscovered(service));
                } else {
                    self.fail(TransportFault::Unknown, format!("Service {} not found", service));
                }
            }
            Request::WriteCharacteristic(handle, value) => {
                let Some(characteristic) = self.services.characteristic(handle.service, handle.uuid)
                else {
                    self.emit(TransportEvent::CharacteristicWriteFailed(
                        handle,
                        format!("Characteristic {} not found", handle.uuid),
                    ));
                    return;
                };
                let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                match self
                    .peripheral
                    .write(&characteristic, &value, write_type)
                    .await
                {
                    Ok(()) => self.emit(TransportEvent::CharacteristicWritten(handle, value)),
                    Err(e) => {
                        self.emit(TransportEvent::CharacteristicWriteFailed(handle, e.to_string()));
                    }
                }
            }
            Request::ReadCharacteristic(handle) => {
                let Some(characteristic) = self.lookup(&handle, TransportFault::CharacteristicRead)
                else {
                    return;
                };
                match self.peripheral.read(&characteristic).await {
                    Ok(value) => self.emit(TransportEvent::CharacteristicRead(handle, value)),
                    Err(e) => self.fail(TransportFault::CharacteristicRead, e),
                }
            }
            Request::WriteDescriptor(handle, value) => self.write_descriptor(handle, value).await,
            Request::Disconnect => {}
        }
    }

    async fn write_descriptor(&self, handle: DescriptorHandle, value: Vec<u8>) {
        let Some(characteristic) =
            self.lookup(&handle.characteristic, TransportFault::DescriptorWrite)
        else {
            return;
        };

        let result = if handle.uuid == CCCD_UUID {
            if value == NOTIFY_OFF {
                self.peripheral.unsubscribe(&characteristic).await
            } else {
                self.peripheral.subscribe(&characteristic).await
            }
        } else {
            match characteristic
                .descriptors
                .iter()
                .find(|d| d.uuid == handle.uuid)
            {
                Some(descriptor) => self.peripheral.write_descriptor(descriptor, &value).await,
                None => {
                    self.fail(
                        TransportFault::DescriptorWrite,
                        format!("Descriptor {} not found", handle.uuid),
                    );
                    return;
                }
            }
        };

        match result {
            Ok(()) => self.emit(TransportEvent::DescriptorWritten(handle, value)),
            Err(e) => self.fail(TransportFault::DescriptorWrite, e),
        }
    }

    fn lookup(&self, handle: &CharacteristicHandle, fault: TransportFault) -> Option<Characteristic> {
        let found = self.services.characteristic(handle.service, handle.uuid);
        if found.is_none() {
            self.fail(fault, format!("Characteristic {} not found", handle.uuid));
        }
        found
    }

    fn forward(&self, notification: ValueNotification) {
        match self.services.handle_for(notification.uuid) {
            Some(handle) => {
                self.emit(TransportEvent::CharacteristicChanged(handle, notification.value));
            }
            None => trace!("Notification from unknown characteristic {}", notification.uuid),
        }
    }

    fn emit(&self, event: TransportEvent) {
        self.sink.emit(event);
    }

    fn fail(&self, fault: TransportFault, detail: impl ToString) {
        self.emit(TransportEvent::Error {
            fault,
            detail: detail.to_string(),
        });
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<ValueNotification> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

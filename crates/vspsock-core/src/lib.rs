//! vspsock Core Library
//!
//! 把 Laird VSP / BlueRadios BRSP 这类 BLE "虚拟串口" 外设变成
//! 可靠的、带流控的双向字节流。
//!
//! # 模块
//!
//! - **profile**: 两种厂商服务的 UUID 和 RTS/CTS 编码
//! - **flow**: RTS/CTS 流控
//! - **channel**: 有界收发缓冲区、背压和 20 字节分包
//! - **socket**: 连接握手状态机和字节流接口
//! - **transport**: BLE 传输层抽象，以及 btleplug 实现和测试用记录实现
//! - **config**: socket 参数和设置文件
//!
//! # 使用示例
//!
//! ```ignore
//! use vspsock_core::{BtleplugTransport, SocketConfig, VspSocket};
//!
//! let (transport, mut events) = BtleplugTransport::new();
//! let mut socket = VspSocket::with_config(transport, SocketConfig::default())?;
//! socket.connect(&peripheral);
//!
//! while let Some(event) = events.recv().await {
//!     socket.handle_event(event);
//!     if socket.is_open() {
//!         socket.write(b"AT\r\n")?;
//!     }
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod flow;
pub mod link;
pub mod profile;
pub mod socket;
pub mod transport;

pub use config::{AppSettings, SocketConfig};
pub use error::{ErrorKind, VspError};
pub use profile::{Manufacturer, ManufacturerProfile, PACKET_SIZE};
pub use socket::{
    NoopCallback, SimpleSocketCallback, SocketCallback, SocketEvent, SocketState, VspSocket,
};
pub use transport::btle::BtleplugTransport;
pub use transport::{
    CharacteristicHandle, DescriptorHandle, Transport, TransportEvent, TransportFault,
};

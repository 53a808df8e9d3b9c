//! 错误类型
//!
//! 所有错误都会通过 [`SocketCallback::on_error`](crate::SocketCallback::on_error)
//! 上报，同时记录为 socket 的最后一个错误。

use std::fmt;
use uuid::Uuid;

/// 错误种类（对应 socket 的 `error()` 查询）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoCompatibleService,
    MissingCharacteristic,
    MissingNotificationDescriptor,
    CharacteristicWriteError,
    CharacteristicReadError,
    DescriptorWriteError,
    DescriptorReadError,
    BufferOverflow,
    NotConnected,
    HandshakeTimeout,
    OperationError,
    InvalidConfig,
    UnknownError,
}

impl ErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::NoCompatibleService => "NoCompatibleService",
            ErrorKind::MissingCharacteristic => "MissingCharacteristic",
            ErrorKind::MissingNotificationDescriptor => "MissingNotificationDescriptor",
            ErrorKind::CharacteristicWriteError => "CharacteristicWriteError",
            ErrorKind::CharacteristicReadError => "CharacteristicReadError",
            ErrorKind::DescriptorWriteError => "DescriptorWriteError",
            ErrorKind::DescriptorReadError => "DescriptorReadError",
            ErrorKind::BufferOverflow => "BufferOverflow",
            ErrorKind::NotConnected => "NotConnected",
            ErrorKind::HandshakeTimeout => "HandshakeTimeout",
            ErrorKind::OperationError => "OperationError",
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 缓冲区方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// VSP socket 错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VspError {
    #[error("No VSP service found")]
    NoCompatibleService,

    #[error("Cannot retrieve the VSP service characteristic {0}")]
    MissingCharacteristic(Uuid),

    #[error("Cannot detect VSP service notifications on {0}")]
    MissingNotificationDescriptor(Uuid),

    #[error("Characteristic write error: {0}")]
    CharacteristicWrite(String),

    #[error("Characteristic read error: {0}")]
    CharacteristicRead(String),

    #[error("Descriptor write error: {0}")]
    DescriptorWrite(String),

    #[error("Descriptor read error: {0}")]
    DescriptorRead(String),

    #[error("Internal read buffer overflow (max. size {max}), data packet dropped")]
    ReadOverflow { max: usize },

    #[error("Internal write buffer overflow (max. size {max}), write failed")]
    WriteOverflow { max: usize },

    #[error("Cannot {0} while not connected")]
    NotConnected(&'static str),

    #[error("Handshake did not complete within {0} ms")]
    HandshakeTimeout(u128),

    #[error("Operation error: {0}")]
    Operation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl VspError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VspError::NoCompatibleService => ErrorKind::NoCompatibleService,
            VspError::MissingCharacteristic(_) => ErrorKind::MissingCharacteristic,
            VspError::MissingNotificationDescriptor(_) => ErrorKind::MissingNotificationDescriptor,
            VspError::CharacteristicWrite(_) => ErrorKind::CharacteristicWriteError,
            VspError::CharacteristicRead(_) => ErrorKind::CharacteristicReadError,
            VspError::DescriptorWrite(_) => ErrorKind::DescriptorWriteError,
            VspError::DescriptorRead(_) => ErrorKind::DescriptorReadError,
            VspError::ReadOverflow { .. } | VspError::WriteOverflow { .. } => {
                ErrorKind::BufferOverflow
            }
            VspError::NotConnected(_) => ErrorKind::NotConnected,
            VspError::HandshakeTimeout(_) => ErrorKind::HandshakeTimeout,
            VspError::Operation(_) => ErrorKind::OperationError,
            VspError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            VspError::Unknown(_) => ErrorKind::UnknownError,
        }
    }

    pub(crate) fn overflow(direction: Direction, max: usize) -> Self {
        match direction {
            Direction::Read => VspError::ReadOverflow { max },
            Direction::Write => VspError::WriteOverflow { max },
        }
    }
}

impl From<VspError> for std::io::Error {
    fn from(err: VspError) -> Self {
        let kind = match err.kind() {
            ErrorKind::NotConnected => std::io::ErrorKind::NotConnected,
            // 发送缓冲区满，稍后重试
            ErrorKind::BufferOverflow => std::io::ErrorKind::WouldBlock,
            ErrorKind::HandshakeTimeout => std::io::ErrorKind::TimedOut,
            ErrorKind::InvalidConfig => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

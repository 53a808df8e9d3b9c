//! 配置和持久化
//!
//! socket 参数（缓冲区上限、握手超时）以及命令行工具的默认设置，
//! 存储在 `<config_dir>/vspsock/settings.toml`。

use crate::error::VspError;
use crate::profile::PACKET_SIZE;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认缓冲区上限
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 4096;

/// 最小缓冲区上限：一个数据包加结尾预留字节
pub const MIN_BUFFER_SIZE: usize = PACKET_SIZE + 1;

/// Socket 参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// 接收/发送缓冲区上限，范围 21 ..= usize::MAX
    pub max_buffer_size: usize,
    /// 握手超时（毫秒）；未设置时握手可以无限等待
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            handshake_timeout_ms: None,
        }
    }
}

impl SocketConfig {
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), VspError> {
        if self.max_buffer_size < MIN_BUFFER_SIZE {
            return Err(VspError::InvalidConfig(format!(
                "max_buffer_size must be at least {}, got {}",
                MIN_BUFFER_SIZE, self.max_buffer_size
            )));
        }
        if self.handshake_timeout_ms == Some(0) {
            return Err(VspError::InvalidConfig(
                "handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 应用设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub socket: SocketConfig,
    /// 查找设备时的扫描时间（秒）
    pub scan_timeout_secs: u64,
    /// 详细日志模式
    pub verbose: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            scan_timeout_secs: 5,
            verbose: false,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vspsock");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在或无效则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Self>(&content) {
                    Ok(settings) => match settings.socket.validate() {
                        Ok(()) => {
                            debug!("Loaded settings from {:?}", path);
                            return settings;
                        }
                        Err(e) => log::warn!("{}, using defaults", e),
                    },
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

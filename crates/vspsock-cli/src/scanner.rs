//! 按地址查找外设

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tokio::time::{self, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// 扫描直到找到 `address`（不区分大小写）或超时
pub async fn find_peripheral(address: &str, timeout: Duration) -> anyhow::Result<Peripheral> {
    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapters found"))?;

    // 不按服务过滤：很多 VSP 模块不在广播包里带服务 UUID
    adapter.start_scan(ScanFilter::default()).await?;
    tracing::debug!("Scanning for {} ({}s)", address, timeout.as_secs());

    let deadline = Instant::now() + timeout;
    let found = loop {
        if let Some(peripheral) = lookup(&adapter, address).await? {
            break Some(peripheral);
        }
        if Instant::now() >= deadline {
            break None;
        }
        time::sleep(POLL_INTERVAL).await;
    };

    if let Err(e) = adapter.stop_scan().await {
        tracing::debug!("stop_scan failed: {}", e);
    }

    found.ok_or_else(|| anyhow::anyhow!("Device {} not found", address))
}

async fn lookup(adapter: &Adapter, address: &str) -> anyhow::Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        if let Some(props) = peripheral.properties().await? {
            if props.address.to_string().eq_ignore_ascii_case(address) {
                let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
                tracing::info!("Found {} ({}), RSSI {:?}", name, props.address, props.rssi);
                return Ok(Some(peripheral));
            }
        }
    }
    Ok(None)
}

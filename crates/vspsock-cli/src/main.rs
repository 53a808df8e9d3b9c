//! vspsock CLI
//!
//! 把 Laird VSP / BlueRadios BRSP 外设桥接到 stdin/stdout

mod bridge;
mod scanner;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vspsock_core::profile::PROFILES;
use vspsock_core::{AppSettings, BtleplugTransport, SimpleSocketCallback, VspSocket};

#[derive(Parser)]
#[command(name = "vspsock", version, about = "BLE 虚拟串口客户端")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 连接外设，stdin 写入外设，外设数据输出到 stdout
    Connect {
        /// 外设 MAC 地址
        address: String,
        /// 扫描超时时间 (秒)
        #[arg(long)]
        scan_secs: Option<u64>,
        /// 收发缓冲区上限 (字节)
        #[arg(long)]
        buffer: Option<usize>,
        /// 握手超时 (毫秒)
        #[arg(long)]
        handshake_timeout_ms: Option<u64>,
        /// stdin 结束后继续输出外设数据，直到 Ctrl-C 或断开
        #[arg(long)]
        listen: bool,
        /// 输出调试日志
        #[arg(short, long)]
        verbose: bool,
        /// 把以上参数保存为默认设置
        #[arg(long)]
        save: bool,
    },
    /// 列出支持的厂商配置
    Profiles,
}

fn init_logging(verbose: bool) {
    // 桥接 log crate（vspsock-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default = if verbose {
        "info,vspsock_core=debug"
    } else {
        "warn,vspsock=info"
    };
    // stdout 留给外设数据
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            address,
            scan_secs,
            buffer,
            handshake_timeout_ms,
            listen,
            verbose,
            save,
        } => {
            let mut settings = AppSettings::load();
            if let Some(secs) = scan_secs {
                settings.scan_timeout_secs = secs;
            }
            if let Some(size) = buffer {
                settings.socket.max_buffer_size = size;
            }
            if let Some(ms) = handshake_timeout_ms {
                settings.socket.handshake_timeout_ms = Some(ms);
            }
            settings.verbose |= verbose;
            init_logging(settings.verbose);

            settings.socket.validate()?;
            if save {
                settings.save()?;
                tracing::info!("Settings saved to {}", AppSettings::config_path().display());
            }

            connect(&address, &settings, listen).await?;
        }
        Commands::Profiles => {
            for profile in PROFILES {
                println!("{}", profile.manufacturer);
                println!("   service:   {}", profile.service_id);
                println!("   rx-fifo:   {}", profile.rx_fifo_id);
                println!("   tx-fifo:   {}", profile.tx_fifo_id);
                println!("   modem-in:  {}", profile.modem_in_id);
                println!("   modem-out: {}", profile.modem_out_id);
                if let Some(mode) = profile.mode_switch_id {
                    println!("   mode:      {}", mode);
                }
                println!(
                    "   RTS/CTS:   set=0x{:02x} clear=0x{:02x}",
                    profile.rts_set_byte, profile.rts_clear_byte
                );
            }
        }
    }

    Ok(())
}

async fn connect(address: &str, settings: &AppSettings, listen: bool) -> Result<()> {
    let scan = Duration::from_secs(settings.scan_timeout_secs);
    let peripheral = scanner::find_peripheral(address, scan).await?;

    let (transport, transport_events) = BtleplugTransport::new();
    let mut socket = VspSocket::with_config(transport, settings.socket.clone())?;
    let (callback, socket_events) = SimpleSocketCallback::new();
    socket.set_callback(callback);
    socket.connect(&peripheral);

    bridge::Bridge::new(socket, transport_events, socket_events, listen)
        .run()
        .await
}

pub mod adc;
pub mod config;
pub mod db;
pub mod detector;
pub mod monitor;
pub mod recording;
pub mod sensor;
pub mod storage;
mod utils;
pub mod wire;

use std::io::IsTerminal;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use adc::{AdcChannel, MockAds1115};
use config::{DeviceConfig, MonitorConfig};
use monitor::{sampling_loop, BoxedSource, MonitorContext};
use sensor::CalibrationMode;

fn mock_source(device: &DeviceConfig) -> BoxedSource {
    let adc = MockAds1115::mock()
        .with_gain(device.gain)
        .with_data_rate(device.data_rate);
    Box::new(AdcChannel::new(adc, device.channel, device.read_timeout()))
}

#[cfg(feature = "hardware")]
fn open_source(device: &DeviceConfig) -> Result<BoxedSource> {
    if device.mock {
        return Ok(mock_source(device));
    }

    let bus = linux_embedded_hal::I2cdev::new(&device.i2c_bus)
        .with_context(|| format!("failed to open I2C bus {}", device.i2c_bus))?;
    let mut driver = adc::Ads1115::new(bus, device.address)
        .with_retry(device.retry())
        .with_gain(device.gain)
        .with_data_rate(device.data_rate);

    if !driver.is_connected() {
        warn!(
            "ADS1115 not detected at 0x{:02X} on {}, continuing with mock ADC",
            device.address, device.i2c_bus
        );
        driver.close();
        return Ok(mock_source(device));
    }

    info!("ADS1115 ready on {}", device.i2c_bus);
    Ok(Box::new(AdcChannel::new(driver, device.channel, device.read_timeout())))
}

#[cfg(not(feature = "hardware"))]
fn open_source(device: &DeviceConfig) -> Result<BoxedSource> {
    if !device.mock {
        warn!("Built without the `hardware` feature, using mock ADC");
    }
    Ok(mock_source(device))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!("Failed to install SIGTERM handler: {err}"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {err}");
    }
}

async fn monitor(config: MonitorConfig) -> Result<()> {
    let source = open_source(&config.device)?;
    let mode = if std::io::stdin().is_terminal() {
        CalibrationMode::Interactive
    } else {
        CalibrationMode::Timed
    };

    let ctx = MonitorContext::new(config, source, Some(mode), None)
        .await
        .context("failed to initialise monitor")?;

    let stats = ctx.storage.get_stats().await?;
    info!(
        "Database: {} readings, {} unsynced, {} bytes",
        stats.total_readings, stats.unsynced_readings, stats.storage_bytes
    );

    let cancel_token = CancellationToken::new();
    tokio::spawn({
        let cancel_token = cancel_token.clone();
        async move {
            wait_for_shutdown_signal().await;
            info!("Shutdown signal received");
            cancel_token.cancel();
        }
    });

    let ctx = sampling_loop(ctx, cancel_token).await;
    ctx.shutdown().await?;
    Ok(())
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("SleepSense starting up...");

    let result = MonitorConfig::load().and_then(|config| {
        config.log_config();
        let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
        runtime.block_on(monitor(config))
    });

    match result {
        Ok(()) => info!("Shutdown complete"),
        Err(err) => {
            error!("Fatal error: {err:#}");
            std::process::exit(1);
        }
    }
}

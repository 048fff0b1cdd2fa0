use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::MonitorContext;

// Set to false to silence the per-sample path
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Samples at the configured rate until `cancel_token` fires.
///
/// Per-sample failures are logged and the loop carries on; the context is
/// handed back for [`MonitorContext::shutdown`].
pub async fn sampling_loop(
    mut ctx: MonitorContext,
    cancel_token: CancellationToken,
) -> MonitorContext {
    let mut ticker = tokio::time::interval(ctx.config.sampling.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sync_ticker = tokio::time::interval(ctx.config.sync.interval());
    sync_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let has_uplink = ctx.uplink.is_some();

    log_info!(
        "Sampling at {} Hz (sleep delay {:?})",
        ctx.config.sampling.rate_hz,
        ctx.config.detector.sleep_delay()
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match ctx.tick().await {
                    Ok(report) => {
                        log::debug!(
                            "{:>7.3} V | {:>5.1}% | {:<16} | {:>6.3} | {}",
                            report.sample.voltage,
                            report.sample.force_percent,
                            report.state.as_str(),
                            report.sample.variance,
                            if report.recording { "REC" } else { "..." }
                        );
                        let deferred = report.outcomes.iter().filter(|o| !o.is_persisted()).count();
                        if deferred > 0 {
                            log_warn!("{deferred} readings not persisted this tick");
                        }
                    }
                    Err(err) => log_error!("sampling tick failed: {err:#}"),
                }
            }
            _ = sync_ticker.tick(), if has_uplink => {
                if let Err(err) = ctx.sync_once().await {
                    log_error!("sync round failed: {err:#}");
                }
            }
        }
    }

    ctx
}

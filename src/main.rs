/*!
 * Futex Stress - Main Entry Point
 *
 * Runs the token ring over every configured atomic width and reports
 * which backend served each one.
 */

use tracing::{error, info};

use ai_os_futex::{init_tracing, run_ring_width, StressConfig, SyncConfig};

fn main() -> miette::Result<()> {
    init_tracing();

    info!("futex stress starting...");

    let sync = SyncConfig::from_env()?;
    sync.clone().install()?;
    info!(
        min_spins = sync.min_spins,
        max_spins = sync.max_spins,
        backoff_initial_us = sync.backoff_initial.as_micros() as u64,
        backoff_max_us = sync.backoff_max.as_micros() as u64,
        "spin configuration installed"
    );

    let config = StressConfig::load()?;
    info!(
        threads = config.threads,
        iterations = config.iterations,
        widths = ?config.widths,
        "stress configuration loaded"
    );

    let mut failures = 0usize;
    for &width in &config.widths {
        match run_ring_width(width, &config) {
            Ok(report) => info!(
                width = report.width,
                backend = report.backend,
                threads = report.threads,
                passes = report.passes,
                spurious_wakeups = report.spurious_wakeups,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "width passed"
            ),
            Err(err) => {
                error!(width, error = %err, "width failed");
                failures += 1;
                if failures == config.widths.len() {
                    return Err(err.into());
                }
            }
        }
    }

    if failures > 0 {
        return Err(miette::miette!("{} of {} widths failed", failures, config.widths.len()));
    }

    info!("all widths passed");
    Ok(())
}

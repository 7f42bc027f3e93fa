//! Daily snapshot scheduling.
//!
//! One scheduler task per chain. Each tick builds the previous completed UTC
//! day for every configured vault, backfilling any days missed while the
//! service was down. Failures are logged and retried on the next tick; the
//! idempotent builder makes partial progress safe.

use crate::SnapshotBuilder;
use chrono::{DateTime, Duration, Utc};
use indexer_types::common::Address;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Next wall-clock instant the scheduler should fire, at `hour`:00 UTC.
pub fn next_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
	let hour = hour.min(23);
	let today = now
		.date_naive()
		.and_hms_opt(hour, 0, 0)
		.map(|t| t.and_utc())
		.unwrap_or(now);
	if today > now {
		today
	} else {
		today + Duration::days(1)
	}
}

/// Runs the daily snapshot schedule until shutdown is signalled.
pub async fn run_daily(
	builder: Arc<SnapshotBuilder>,
	vaults: Vec<Address>,
	hour: u32,
	mut shutdown: watch::Receiver<bool>,
) {
	info!(hour, vaults = vaults.len(), "snapshot scheduler started");
	loop {
		let wait = (next_run(Utc::now(), hour) - Utc::now())
			.to_std()
			.unwrap_or_default();

		tokio::select! {
			_ = tokio::time::sleep(wait) => {
				let Some(through) = Utc::now().date_naive().pred_opt() else {
					continue;
				};
				for vault in &vaults {
					if let Err(e) = builder.backfill(*vault, through).await {
						warn!(
							vault = %vault,
							%through,
							error = %e,
							"snapshot build failed, retrying next tick"
						);
					}
				}
			}
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					info!("snapshot scheduler stopping");
					return;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn test_next_run_later_today() {
		let now = Utc.with_ymd_and_hms(2026, 8, 29, 3, 30, 0).unwrap();
		let next = next_run(now, 6);
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 29, 6, 0, 0).unwrap());
	}

	#[test]
	fn test_next_run_rolls_to_tomorrow() {
		let now = Utc.with_ymd_and_hms(2026, 8, 29, 6, 0, 0).unwrap();
		let next = next_run(now, 6);
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 30, 6, 0, 0).unwrap());
	}

	#[test]
	fn test_next_run_clamps_hour() {
		let now = Utc.with_ymd_and_hms(2026, 8, 29, 0, 0, 0).unwrap();
		let next = next_run(now, 99);
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 8, 29, 23, 0, 0).unwrap());
	}
}

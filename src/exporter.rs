use std::sync::{Arc, Mutex};

use anyhow::Context;
use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::collector::Collector;

pub const UNIQUE_USERS_TOTAL: &str = "unique_users_total";
pub const ACTIVE_USERS: &str = "active_users";
pub const SEGMENT_LABEL: &str = "segment_seconds";

/// Maps collector snapshots onto the two exported metric families.
///
/// - `unique_users_total`: counter, advanced by the growth of the
///   collector's unique count since the previous render
/// - `active_users{segment_seconds}`: one gauge per window
///
/// The registry is private to the exporter, so the text output holds
/// exactly these two families.
pub struct Exporter {
    collector: Arc<Collector>,
    registry: Registry,
    unique_users: IntCounter,
    active_users: IntGaugeVec,
    previous_unique_count: Mutex<u64>,
}

impl Exporter {
    pub fn new(collector: Arc<Collector>) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let unique_users = IntCounter::new(
            UNIQUE_USERS_TOTAL,
            "Number of distinct user ids seen since start",
        )
        .context("failed to create unique users counter")?;

        let active_users = IntGaugeVec::new(
            Opts::new(
                ACTIVE_USERS,
                "Distinct user ids seen during the last completed window",
            ),
            &[SEGMENT_LABEL],
        )
        .context("failed to create active users gauge")?;

        registry
            .register(Box::new(unique_users.clone()))
            .context("failed to register unique users counter")?;
        registry
            .register(Box::new(active_users.clone()))
            .context("failed to register active users gauge")?;

        // one series per window from the first scrape on
        for seconds in collector.window_durations() {
            active_users
                .with_label_values(&[seconds.to_string().as_str()])
                .set(0);
        }

        Ok(Self {
            collector,
            registry,
            unique_users,
            active_users,
            previous_unique_count: Mutex::new(0),
        })
    }

    /// Refreshes both metric families from a fresh snapshot and returns
    /// them in Prometheus text exposition format.
    ///
    /// Concurrent renders are serialized: snapshot, counter update, gauge
    /// updates and encoding all happen under the render lock, so an older
    /// snapshot can never be applied after a newer one.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut previous = self
            .previous_unique_count
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot = self.collector.snapshot();

        let delta = snapshot.unique_count.saturating_sub(*previous);
        if delta > 0 {
            self.unique_users.inc_by(delta);
        }
        *previous = (*previous).max(snapshot.unique_count);

        for (seconds, active) in &snapshot.active_by_window {
            self.active_users
                .with_label_values(&[seconds.to_string().as_str()])
                .set(i64::try_from(*active).unwrap_or(i64::MAX));
        }

        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .context("failed to encode metrics")?;

        drop(previous);

        String::from_utf8(buffer).context("metrics encoder produced non-UTF-8 output")
    }
}

//! JSON-lines tick ingestion.

use std::collections::BTreeMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use sesh_core::UserId;
use sesh_engine::{SessionError, SessionService};
use sesh_store::ticks::NewTick;
use sesh_store::StoreError;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub users: usize,
    pub recorded: usize,
    /// Recorded and placed in an inferred session right away.
    pub grouped: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl IngestReport {
    fn merge(&mut self, other: &IngestReport) {
        self.recorded += other.recorded;
        self.grouped += other.grouped;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
    }
}

/// Parse one tick per non-blank line. Unparsable lines are logged and counted.
pub fn parse_lines(reader: impl BufRead) -> Result<(Vec<NewTick>, usize)> {
    let mut ticks = Vec::new();
    let mut invalid = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<NewTick>(&line) {
            Ok(tick) => ticks.push(tick),
            Err(error) => {
                warn!(line = index + 1, error = %error, "skipping malformed tick");
                invalid += 1;
            }
        }
    }
    Ok((ticks, invalid))
}

/// Group ticks by user, each user's ticks in climb order.
pub fn partition_by_user(ticks: Vec<NewTick>) -> BTreeMap<UserId, Vec<NewTick>> {
    let mut by_user: BTreeMap<UserId, Vec<NewTick>> = BTreeMap::new();
    for tick in ticks {
        by_user.entry(tick.user_id.clone()).or_default().push(tick);
    }
    for ticks in by_user.values_mut() {
        ticks.sort_by(|a, b| a.climbed_at.cmp(&b.climbed_at).then_with(|| a.uuid.cmp(&b.uuid)));
    }
    by_user
}

fn record_user_ticks(service: &SessionService, ticks: Vec<NewTick>) -> IngestReport {
    let mut report = IngestReport::default();
    for tick in ticks {
        let uuid = tick.uuid.clone();
        match service.record_tick(tick) {
            Ok(row) => {
                report.recorded += 1;
                if row.inferred_session_id.is_some() {
                    report.grouped += 1;
                }
            }
            Err(SessionError::Store(StoreError::Conflict(_))) => report.duplicates += 1,
            Err(error) => {
                warn!(
                    tick_uuid = %uuid,
                    error = %error,
                    kind = error.error_kind(),
                    "failed to record tick"
                );
                report.failed += 1;
            }
        }
    }
    report
}

/// Record ticks with one blocking task per user. A user's ticks are recorded
/// in order so each one sees its predecessors.
pub async fn ingest(
    service: &SessionService,
    ticks: Vec<NewTick>,
    invalid: usize,
) -> Result<IngestReport> {
    let by_user = partition_by_user(ticks);
    let mut report = IngestReport {
        users: by_user.len(),
        invalid,
        ..Default::default()
    };

    let handles: Vec<_> = by_user
        .into_values()
        .map(|user_ticks| {
            let service = service.clone();
            tokio::task::spawn_blocking(move || record_user_ticks(&service, user_ticks))
        })
        .collect();

    for handle in handles {
        let user_report = handle.await.context("ingest worker panicked")?;
        report.merge(&user_report);
    }

    info!(
        users = report.users,
        recorded = report.recorded,
        grouped = report.grouped,
        duplicates = report.duplicates,
        invalid = report.invalid,
        failed = report.failed,
        "ingest complete"
    );
    Ok(report)
}

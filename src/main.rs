//! # sesh
//!
//! Command-line entry point: loads settings, installs telemetry, opens the
//! database and runs one session operation, printing JSON to stdout.

#![deny(unsafe_code)]

mod cli;
mod ingest;

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sesh_engine::{BackfillScope, EngineConfig, SessionFeedQuery, SessionService};
use sesh_settings::SeshSettings;
use sesh_store::Database;
use sesh_telemetry::TelemetryConfig;

use crate::cli::{Cli, Command};

fn engine_config(settings: &SeshSettings) -> EngineConfig {
    EngineConfig {
        gap: chrono::Duration::milliseconds(clamp_ms(settings.clustering.gap_threshold_ms)),
        membership_buffer: chrono::Duration::milliseconds(clamp_ms(
            settings.clustering.membership_window_buffer_ms,
        )),
        batch_size: settings.backfill.batch_size,
        default_page_size: settings.feed.default_page_size,
        max_page_size: settings.feed.max_page_size,
    }
}

fn clamp_ms(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn database_path(cli: &Cli, settings: &SeshSettings) -> PathBuf {
    cli.db_path
        .clone()
        .unwrap_or_else(|| sesh_settings::expand_home(&settings.database.path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(path: &Path) -> Result<(Vec<sesh_store::ticks::NewTick>, usize)> {
    if path.as_os_str() == "-" {
        ingest::parse_lines(std::io::stdin().lock())
    } else {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        ingest::parse_lines(BufReader::new(file))
    }
}

/// Backfill every `interval` until Ctrl-C. A failed run is logged and the
/// loop continues; the next run picks up where it stopped.
async fn watch(service: SessionService, interval: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping after the current batch");
            }
            cancel.cancel();
        })
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let svc = service.clone();
        let token = cancel.clone();
        let run = tokio::task::spawn_blocking(move || {
            svc.backfill(&BackfillScope::AllUsers, &token, None)
        })
        .await
        .context("backfill worker panicked")?;
        match run {
            Ok(report) => info!(
                users = report.users,
                ticks_assigned = report.ticks_assigned,
                sessions_touched = report.sessions_touched,
                cancelled = report.cancelled,
                "periodic backfill finished"
            ),
            Err(err) => error!(error = %err, kind = err.error_kind(), "periodic backfill failed"),
        }
    }

    ctrl_c.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => sesh_settings::load_settings_from_path(path),
        None => sesh_settings::load_settings(),
    }
    .context("failed to load settings")?;

    sesh_telemetry::init_telemetry(&TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));

    let db_path = database_path(&cli, &settings);
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let service = SessionService::new(db, engine_config(&settings));

    match cli.command {
        Command::Ingest { input } => {
            let (ticks, invalid) = read_input(&input)?;
            let report = ingest::ingest(&service, ticks, invalid).await?;
            print_json(&report)
        }
        Command::Backfill { user, max_secs } => {
            let scope = user.map_or(BackfillScope::AllUsers, BackfillScope::User);
            let deadline = max_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
            let cancel = CancellationToken::new();
            let svc = service.clone();
            let report =
                tokio::task::spawn_blocking(move || svc.backfill(&scope, &cancel, deadline))
                    .await
                    .context("backfill worker panicked")??;
            print_json(&report)
        }
        Command::Watch { interval_secs } => {
            let secs = interval_secs.unwrap_or(settings.backfill.interval_secs).max(1);
            info!(interval_secs = secs, db = %db_path.display(), "watching for ungrouped ticks");
            watch(service, Duration::from_secs(secs)).await
        }
        Command::Feed {
            sort,
            period,
            user,
            cursor,
            limit,
        } => {
            let query = SessionFeedQuery {
                sort,
                period,
                user_id: user,
                cursor,
                limit,
                ..SessionFeedQuery::new(chrono::Utc::now())
            };
            print_json(&service.session_feed(&query)?)
        }
        Command::Ticks { user, cursor, limit } => {
            print_json(&service.user_ticks(&user, cursor.as_deref(), limit)?)
        }
        Command::Detail { session } => match service.session_detail(&session)? {
            Some(detail) => print_json(&detail),
            None => anyhow::bail!("session {session} not found"),
        },
        Command::AddMember { session, user, actor } => {
            print_json(&service.add_member(actor.as_ref(), &session, &user)?)
        }
        Command::RemoveMember { session, user, actor } => {
            print_json(&service.remove_member(actor.as_ref(), &session, &user)?)
        }
        Command::Rename {
            session,
            name,
            description,
            actor,
        } => print_json(&service.update_session(
            actor.as_ref(),
            &session,
            name.as_deref(),
            description.as_deref(),
        )?),
        Command::Vote { session, value, actor } => {
            print_json(&service.cast_vote(actor.as_ref(), &session, value)?)
        }
        Command::Recalc { session } => print_json(&service.recalculate(&session)?),
    }
}

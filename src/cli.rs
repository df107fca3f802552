use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sesh_core::{SessionId, UserId};
use sesh_engine::{FeedSort, TimePeriod};

/// Inferred climbing-session engine.
#[derive(Parser, Debug)]
#[command(name = "sesh", about = "Group climbing ticks into sessions")]
pub struct Cli {
    /// Settings file (defaults to `~/.sesh/settings.json`).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// SQLite database path (overrides settings).
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Record ticks from a JSON-lines file (`-` for stdin).
    Ingest {
        input: PathBuf,
    },
    /// Group every ungrouped tick.
    Backfill {
        /// Only backfill this user.
        #[arg(long)]
        user: Option<UserId>,
        /// Stop after this many seconds.
        #[arg(long)]
        max_secs: Option<u64>,
    },
    /// Run backfill periodically until interrupted.
    Watch {
        /// Seconds between runs (overrides settings).
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Page through the session feed.
    Feed {
        #[arg(long, default_value_t = FeedSort::New)]
        sort: FeedSort,
        #[arg(long, default_value = "all")]
        period: TimePeriod,
        /// Only sessions this user took part in.
        #[arg(long)]
        user: Option<UserId>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Page through one user's ticks, newest first.
    Ticks {
        user: UserId,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Show one session.
    Detail {
        session: SessionId,
    },
    /// Add a climber to a session, moving their overlapping ticks in.
    AddMember {
        session: SessionId,
        user: UserId,
        /// Acting user.
        #[arg(long = "as")]
        actor: Option<UserId>,
    },
    /// Remove a climber from a session, restoring their ticks.
    RemoveMember {
        session: SessionId,
        user: UserId,
        #[arg(long = "as")]
        actor: Option<UserId>,
    },
    /// Set a session's name or description. An empty value clears it.
    Rename {
        session: SessionId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "as")]
        actor: Option<UserId>,
    },
    /// Vote on a session: 1, -1, or 0 to withdraw.
    Vote {
        session: SessionId,
        #[arg(allow_negative_numbers = true)]
        value: i8,
        #[arg(long = "as")]
        actor: Option<UserId>,
    },
    /// Recompute a session's counts from its ticks.
    Recalc {
        session: SessionId,
    },
}

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use log::info;

use crate::{
    config::{Cli, FileConfigStore},
    listeners::{DetailsListener, SessionListener, StatsListener, TorrentsListener},
    manager::PollingManager,
    model::{
        format_bytes, format_eta, format_progress, format_speed, SessionStats, TorrentDetail,
        TorrentSummary,
    },
    remote::HttpClientFactory,
    session::Session,
};

const TICK: Duration = Duration::from_millis(250);

/// Polls the selected servers and prints the active one's updates until the
/// requested duration elapses.
pub fn run(cli: &Cli, store: FileConfigStore) -> Result<()> {
    let (servers, active) =
        select_servers(&cli.servers, store.server_ids(), cli.active.as_deref())?;
    let deadline = match cli.duration {
        Some(secs) if !secs.is_finite() || secs < 0.0 => {
            anyhow::bail!("duration cannot be negative")
        }
        // too far out to represent means run until interrupted
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .and_then(|span| Instant::now().checked_add(span)),
        None => None,
    };

    let intervals = store.config().intervals;
    let mut manager = PollingManager::new(store, HttpClientFactory, intervals);

    let torrents_listener: Arc<TorrentsListener> = Arc::new(print_torrents);
    let session_listener: Arc<SessionListener> = Arc::new(print_session);
    let details_listener: Arc<DetailsListener> = Arc::new(print_details);
    let stats_listener: Arc<StatsListener> = Arc::new(print_stats);
    manager.set_torrents_listener(Some(&torrents_listener));
    manager.set_session_listener(Some(&session_listener));
    manager.set_details_listener(Some(&details_listener));
    if cli.stats {
        manager.set_stats_listener(Some(&stats_listener));
    }

    for server in &servers {
        manager
            .open(server)
            .with_context(|| format!("failed to open server {server}"))?;
        manager.start_loops(server);
    }
    manager.set_active_server(Some(&active));
    if let Some(id) = cli.details {
        manager.set_details_subject(&active, Some(id));
    }
    info!("polling {} server(s), showing {active}", servers.len());

    loop {
        let wait = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                (deadline - now).min(TICK)
            }
            None => TICK,
        };
        manager.pump(wait);
    }

    manager.close_all();
    Ok(())
}

/// Requested servers (every configured one when none are named) and the one
/// whose updates get printed, which must be among them.
fn select_servers<'a>(
    requested: &[String],
    configured: impl Iterator<Item = &'a str>,
    active: Option<&str>,
) -> Result<(Vec<String>, String)> {
    let servers: Vec<String> = if requested.is_empty() {
        configured.map(str::to_string).collect()
    } else {
        requested.to_vec()
    };
    let Some(first) = servers.first() else {
        anyhow::bail!("no servers configured");
    };
    let active = match active {
        Some(active) if !servers.iter().any(|s| s == active) => {
            anyhow::bail!("active server {active} is not among the polled servers")
        }
        Some(active) => active.to_string(),
        None => first.clone(),
    };
    Ok((servers, active))
}

fn print_torrents(server: &str, torrents: &[TorrentSummary]) {
    println!("[{server}] {} torrent(s)", torrents.len());
    for torrent in torrents {
        println!("  {}", summary_line(torrent));
    }
}

fn summary_line(summary: &TorrentSummary) -> String {
    let mut line = format!(
        "#{:<5} {:<40.40}  {:<13}  {:>6}  DL {:>7}  UL {:>7}  ETA {}",
        summary.torrent_id,
        summary.name,
        summary.status,
        format_progress(summary.percent_done),
        format_speed(summary.rate_download),
        format_speed(summary.rate_upload),
        format_eta(summary.eta)
    );
    if let Some(error) = &summary.error {
        line.push_str(&format!("  ! {error}"));
    }
    line
}

fn print_session(server: &str, session: &Session) {
    println!(
        "[{server}] Transmission {} | dir {} | {} | peers {}/{}",
        session.version_label(),
        session.download_dir,
        session.encryption_mode.label(),
        session.peer_limit_per_torrent,
        session.peer_limit_global
    );
}

fn print_details(server: &str, details: Option<&TorrentDetail>) {
    let Some(details) = details else {
        println!("[{server}] details unavailable");
        return;
    };
    println!(
        "[{server}] {} ({}) | {} file(s), {} peer(s), {} tracker(s)",
        details.name,
        details.hash,
        details.files.len(),
        details.peers.len(),
        details.trackers.len()
    );
    for file in &details.files {
        println!(
            "  {:>6}  {:>10}  {}",
            format_progress(file.progress()),
            format_bytes(file.length),
            file.name
        );
    }
}

fn print_stats(server: &str, stats: &SessionStats) {
    println!(
        "[{server}] DL {}  UL {}  | Active {}  Paused {}  Total {}  | Downloaded {} Uploaded {}",
        format_speed(stats.download_speed),
        format_speed(stats.upload_speed),
        stats.active_torrents,
        stats.paused_torrents,
        stats.total_torrents,
        format_bytes(stats.cumulative.downloaded_bytes),
        format_bytes(stats.cumulative.uploaded_bytes)
    );
}

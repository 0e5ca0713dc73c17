//! Keeps live mirrors of several Transmission daemons by polling them.
//!
//! Every open server gets four independent loops (torrent list, torrent
//! details, session settings, transfer stats). A loop fetches, stores the
//! result, notifies listeners if its server is the active one and schedules
//! its next fetch a fixed interval later, whether the fetch worked or not.
//!
//! All state lives on the thread that owns the [`PollingManager`]. Fetches
//! run on short-lived worker threads and report back over a channel; their
//! results are only applied inside [`PollingManager::pump`], so a loop never
//! has more than one fetch outstanding and no locking is needed.

use std::{
    collections::HashMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::{
    config::{ConfigStore, PollIntervals},
    entry::{AfterFetch, LoopKind, LoopState, Resolution, ServerEntry, Step},
    listeners::{DetailsListener, Listeners, SessionListener, StatsListener, TorrentsListener},
    model::{SessionStats, TorrentDetail, TorrentSummary},
    remote::{ClientFactory, RemoteClient},
    rpc::{RpcResult, TransmissionError},
    session::Session,
    timers::TimerQueue,
};

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("no connection configured for server {0}")]
    UnknownServer(String),
    #[error("failed to create client for server {server}: {source}")]
    Connect {
        server: String,
        #[source]
        source: TransmissionError,
    },
}

#[derive(Debug, Clone, Copy)]
enum FetchJob {
    FullSession,
    Torrents,
    Details(i64),
    Session,
    Stats,
}

impl FetchJob {
    fn label(self) -> &'static str {
        match self {
            FetchJob::FullSession => "fullsession",
            FetchJob::Torrents => LoopKind::Torrents.label(),
            FetchJob::Details(_) => LoopKind::Details.label(),
            FetchJob::Session => LoopKind::Session.label(),
            FetchJob::Stats => LoopKind::SessionStats.label(),
        }
    }

    fn run(self, client: &dyn RemoteClient) -> Outcome {
        match self {
            FetchJob::FullSession => Outcome::FullSession(client.fetch_full_session()),
            FetchJob::Torrents => Outcome::Torrents(client.fetch_torrent_list()),
            FetchJob::Details(id) => Outcome::Details(id, client.fetch_torrent_details(id)),
            FetchJob::Session => Outcome::Session(client.fetch_session_info()),
            FetchJob::Stats => Outcome::Stats(client.fetch_session_stats()),
        }
    }

    fn fail(self, err: TransmissionError) -> Outcome {
        match self {
            FetchJob::FullSession => Outcome::FullSession(Err(err)),
            FetchJob::Torrents => Outcome::Torrents(Err(err)),
            FetchJob::Details(id) => Outcome::Details(id, Err(err)),
            FetchJob::Session => Outcome::Session(Err(err)),
            FetchJob::Stats => Outcome::Stats(Err(err)),
        }
    }
}

enum Outcome {
    FullSession(RpcResult<Session>),
    Torrents(RpcResult<Vec<TorrentSummary>>),
    Details(i64, RpcResult<TorrentDetail>),
    Session(RpcResult<Session>),
    Stats(RpcResult<SessionStats>),
}

struct Completion {
    server: String,
    epoch: u64,
    outcome: Outcome,
}

#[derive(Debug)]
struct TimerTarget {
    server: String,
    epoch: u64,
    kind: LoopKind,
}

pub struct PollingManager {
    config: Box<dyn ConfigStore>,
    factory: Box<dyn ClientFactory>,
    intervals: PollIntervals,
    servers: HashMap<String, ServerEntry>,
    active_server: Option<String>,
    listeners: Listeners,
    timers: TimerQueue<TimerTarget>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    next_epoch: u64,
}

impl PollingManager {
    pub fn new(
        config: impl ConfigStore + 'static,
        factory: impl ClientFactory + 'static,
        intervals: PollIntervals,
    ) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            config: Box::new(config),
            factory: Box::new(factory),
            intervals,
            servers: HashMap::new(),
            active_server: None,
            listeners: Listeners::default(),
            timers: TimerQueue::default(),
            completion_tx,
            completion_rx,
            next_epoch: 0,
        }
    }

    /// Opens `server` and starts its torrent list and session loops, plus a
    /// one-shot fetch of the complete session. Opening an open server does
    /// nothing.
    pub fn open(&mut self, server: &str) -> Result<(), PollerError> {
        if self.servers.contains_key(server) {
            return Ok(());
        }
        let connection = self
            .config
            .server_connection(server)
            .ok_or_else(|| PollerError::UnknownServer(server.to_string()))?;
        let hostname = connection.hostname();
        let client = self
            .factory
            .connect(server, connection)
            .map_err(|source| PollerError::Connect {
                server: server.to_string(),
                source,
            })?;

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        info!("{server}: opened ({hostname})");
        self.servers.insert(
            server.to_string(),
            ServerEntry::new(epoch, client.clone(), hostname),
        );

        spawn_fetch(
            &self.completion_tx,
            server.to_string(),
            epoch,
            client,
            FetchJob::FullSession,
        );
        self.start_loop(server, LoopKind::Torrents);
        self.start_loop(server, LoopKind::Session);
        Ok(())
    }

    /// Forgets `server`. Pending timers are cancelled and results of fetches
    /// still outstanding are dropped when they arrive.
    pub fn close(&mut self, server: &str) {
        let Some(mut entry) = self.servers.remove(server) else {
            return;
        };
        for kind in LoopKind::ALL {
            if let Step::Cancel(key) = entry.loop_state_mut(kind).stop() {
                self.timers.cancel(key);
            }
        }
        info!("{server}: closed");
    }

    pub fn close_all(&mut self) {
        let servers: Vec<String> = self.servers.keys().cloned().collect();
        for server in servers {
            self.close(&server);
        }
    }

    /// Changes whose updates reach the listeners. Nothing missed while a
    /// server was inactive is replayed; read its snapshots instead.
    pub fn set_active_server(&mut self, server: Option<&str>) {
        if self.active_server.as_deref() == server {
            return;
        }
        debug!("active server: {}", server.unwrap_or("none"));
        self.active_server = server.map(str::to_string);
    }

    pub fn active_server(&self) -> Option<&str> {
        self.active_server.as_deref()
    }

    /// Picks the torrent whose details are polled. A new subject is fetched
    /// right away; `None` stops the details loop.
    pub fn set_details_subject(&mut self, server: &str, id: Option<i64>) {
        let Some(entry) = self.servers.get_mut(server) else {
            return;
        };
        let changed = entry.details_subject != id;
        entry.details_subject = id;
        if changed {
            entry.torrent_details = None;
        }
        let state = entry.loop_state_mut(LoopKind::Details);
        let step = match id {
            None => state.stop(),
            Some(_) if changed || !state.is_running() => state.restart(),
            Some(_) => Step::Idle,
        };
        self.apply(server, LoopKind::Details, step);
    }

    /// Starts every loop of `server` that is allowed to run and is not running
    /// yet. Details need a subject and stats need a registered stats listener.
    pub fn start_loops(&mut self, server: &str) {
        let Some(entry) = self.servers.get(server) else {
            return;
        };
        let has_subject = entry.details_subject.is_some();
        let wants_stats = self.listeners.stats.is_registered();
        self.start_loop(server, LoopKind::Torrents);
        self.start_loop(server, LoopKind::Session);
        if has_subject {
            self.start_loop(server, LoopKind::Details);
        }
        if wants_stats {
            self.start_loop(server, LoopKind::SessionStats);
        }
    }

    /// Stops every loop of `server` but keeps its entry and snapshots.
    pub fn stop_loops(&mut self, server: &str) {
        for kind in LoopKind::ALL {
            let Some(entry) = self.servers.get_mut(server) else {
                return;
            };
            let step = entry.loop_state_mut(kind).stop();
            self.apply(server, kind, step);
        }
    }

    /// Fetches `kind` now instead of waiting for its timer.
    pub fn refresh(&mut self, server: &str, kind: LoopKind) {
        let Some(entry) = self.servers.get_mut(server) else {
            return;
        };
        if kind == LoopKind::Details && entry.details_subject.is_none() {
            return;
        }
        if kind == LoopKind::SessionStats && !self.listeners.stats.is_registered() {
            return;
        }
        let step = entry.loop_state_mut(kind).restart();
        self.apply(server, kind, step);
    }

    pub fn set_torrents_listener(&mut self, listener: Option<&Arc<TorrentsListener>>) {
        self.listeners.torrents.set(listener);
    }

    pub fn set_details_listener(&mut self, listener: Option<&Arc<DetailsListener>>) {
        self.listeners.details.set(listener);
    }

    pub fn set_session_listener(&mut self, listener: Option<&Arc<SessionListener>>) {
        self.listeners.session.set(listener);
    }

    /// Registering does not start the stats loop; call
    /// [`PollingManager::start_loops`] afterwards.
    pub fn set_stats_listener(&mut self, listener: Option<&Arc<StatsListener>>) {
        self.listeners.stats.set(listener);
    }

    pub fn client(&self, server: &str) -> Option<Arc<dyn RemoteClient>> {
        self.servers.get(server).map(|entry| entry.client.clone())
    }

    pub fn hostname(&self, server: &str) -> Option<&str> {
        self.servers.get(server).map(ServerEntry::hostname)
    }

    pub fn entry(&self, server: &str) -> Option<&ServerEntry> {
        self.servers.get(server)
    }

    pub fn is_open(&self, server: &str) -> bool {
        self.servers.contains_key(server)
    }

    pub fn open_servers(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn loop_state(&self, server: &str, kind: LoopKind) -> Option<LoopState> {
        self.servers.get(server).map(|entry| entry.loop_state(kind))
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    /// Fires due timers, waits up to `max_wait` (less if a timer comes due
    /// sooner) for fetch results and applies every result that arrived.
    /// Returns how many results were applied.
    pub fn pump(&mut self, max_wait: Duration) -> usize {
        self.fire_due(Instant::now());
        let wait = match self.timers.next_due() {
            Some(due) => due.saturating_duration_since(Instant::now()).min(max_wait),
            None => max_wait,
        };

        let mut handled = 0;
        match self.completion_rx.recv_timeout(wait) {
            Ok(completion) => {
                self.handle_completion(completion);
                handled += 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("fetch completion channel disconnected");
            }
        }
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.handle_completion(completion);
            handled += 1;
        }

        self.fire_due(Instant::now());
        trace!(
            "pump applied {handled} results; {} timers pending",
            self.timers.len()
        );
        handled
    }

    /// Dispatches the fetch of every loop whose timer is due at `now`.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some((key, target)) = self.timers.pop_due(now) {
            let Some(entry) = self.servers.get_mut(&target.server) else {
                continue;
            };
            if entry.epoch != target.epoch
                || entry.loop_state(target.kind) != LoopState::Scheduled(key)
            {
                continue;
            }
            *entry.loop_state_mut(target.kind) = LoopState::Stopped;
            self.dispatch(&target.server, target.kind);
            fired += 1;
        }
        fired
    }

    fn start_loop(&mut self, server: &str, kind: LoopKind) {
        let Some(entry) = self.servers.get_mut(server) else {
            return;
        };
        let step = entry.loop_state_mut(kind).start();
        self.apply(server, kind, step);
    }

    fn apply(&mut self, server: &str, kind: LoopKind, step: Step) {
        match step {
            Step::Idle => {}
            Step::Fetch => self.dispatch(server, kind),
            Step::Cancel(key) => {
                self.timers.cancel(key);
            }
            Step::CancelThenFetch(key) => {
                self.timers.cancel(key);
                self.dispatch(server, kind);
            }
        }
    }

    fn dispatch(&mut self, server: &str, kind: LoopKind) {
        let Some(entry) = self.servers.get_mut(server) else {
            return;
        };
        let job = match kind {
            LoopKind::Torrents => FetchJob::Torrents,
            LoopKind::Session => FetchJob::Session,
            LoopKind::SessionStats => FetchJob::Stats,
            LoopKind::Details => match entry.details_subject {
                Some(id) => FetchJob::Details(id),
                None => {
                    *entry.loop_state_mut(kind) = LoopState::Stopped;
                    return;
                }
            },
        };
        *entry.loop_state_mut(kind) = LoopState::InFlight(AfterFetch::Reschedule);
        trace!("{server}: dispatching {kind} fetch");
        spawn_fetch(
            &self.completion_tx,
            server.to_string(),
            entry.epoch,
            entry.client.clone(),
            job,
        );
    }

    fn schedule(&mut self, server: &str, kind: LoopKind) {
        let Some(entry) = self.servers.get_mut(server) else {
            return;
        };
        let interval = match kind {
            LoopKind::Torrents => self.intervals.torrents,
            LoopKind::Details => self.intervals.details,
            LoopKind::Session => self.intervals.session,
            LoopKind::SessionStats => self.intervals.stats,
        };
        let Some(due) = Instant::now().checked_add(interval) else {
            warn!("{server}: {kind} interval {interval:?} is out of range; loop stopped");
            *entry.loop_state_mut(kind) = LoopState::Stopped;
            return;
        };
        let key = self.timers.schedule(
            due,
            TimerTarget {
                server: server.to_string(),
                epoch: entry.epoch,
                kind,
            },
        );
        *entry.loop_state_mut(kind) = LoopState::Scheduled(key);
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            server,
            epoch,
            outcome,
        } = completion;
        let Some(entry) = self.servers.get_mut(&server) else {
            debug!("{server}: dropping result for closed server");
            return;
        };
        if entry.epoch != epoch {
            debug!("{server}: dropping result from a previous connection");
            return;
        }
        let active = self.active_server.as_deref();
        let listeners = &self.listeners;

        let kind = match outcome {
            Outcome::FullSession(result) => {
                match result {
                    Ok(_) if entry.session_polled => {
                        debug!("{server}: full session arrived after a newer session poll");
                    }
                    Ok(session) => {
                        entry.session = session;
                        listeners.session_changed(active, &server, &entry.session);
                    }
                    Err(err) => warn!("{server}: full session fetch failed: {err}"),
                }
                return;
            }
            Outcome::Torrents(result) => {
                match result {
                    Ok(torrents) => {
                        entry.torrents = torrents;
                        listeners.torrents_changed(active, &server, &entry.torrents);
                    }
                    Err(err) => warn!("{server}: torrents fetch failed: {err}"),
                }
                LoopKind::Torrents
            }
            Outcome::Details(id, result) => {
                if entry.details_subject != Some(id) {
                    debug!("{server}: discarding details of torrent {id}, no longer the subject");
                } else {
                    match result {
                        Ok(details) => {
                            entry.torrent_details = Some(details);
                            listeners.details_changed(
                                active,
                                &server,
                                entry.torrent_details.as_ref(),
                            );
                        }
                        Err(err) => {
                            warn!("{server}: details fetch for torrent {id} failed: {err}");
                            listeners.details_changed(active, &server, None);
                        }
                    }
                }
                LoopKind::Details
            }
            Outcome::Session(result) => {
                match result {
                    Ok(session) => {
                        entry.session = session;
                        entry.session_polled = true;
                        listeners.session_changed(active, &server, &entry.session);
                    }
                    Err(err) => warn!("{server}: session fetch failed: {err}"),
                }
                LoopKind::Session
            }
            Outcome::Stats(result) => {
                match result {
                    Ok(stats) => {
                        let stats = entry.session_stats.insert(stats);
                        listeners.stats_changed(active, &server, stats);
                    }
                    Err(err) => warn!("{server}: session stats fetch failed: {err}"),
                }
                LoopKind::SessionStats
            }
        };

        let resolution = entry.loop_state_mut(kind).resolve();
        match resolution {
            Resolution::Reschedule => self.schedule(&server, kind),
            Resolution::FetchNow => self.dispatch(&server, kind),
            Resolution::Stopped => trace!("{server}: {kind} loop stopped"),
        }
    }
}

impl Drop for PollingManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Runs one fetch on its own thread so a hung daemon stalls only this loop.
fn spawn_fetch(
    tx: &Sender<Completion>,
    server: String,
    epoch: u64,
    client: Arc<dyn RemoteClient>,
    job: FetchJob,
) {
    let worker_tx = tx.clone();
    let worker_server = server.clone();
    let spawned = thread::Builder::new()
        .name(format!("fetch-{server}-{}", job.label()))
        .spawn(move || {
            let outcome = job.run(client.as_ref());
            let _ = worker_tx.send(Completion {
                server: worker_server,
                epoch,
                outcome,
            });
        });
    if let Err(err) = spawned {
        let _ = tx.send(Completion {
            server,
            epoch,
            outcome: job.fail(TransmissionError::Worker(err)),
        });
    }
}

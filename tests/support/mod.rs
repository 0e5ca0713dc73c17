#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use transmission_poller::{
    listeners::{DetailsListener, SessionListener, StatsListener, TorrentsListener},
    model::{SessionStats, TorrentDetail, TorrentSummary},
    session::Session,
    ClientFactory, ConfigStore, LoopKind, PollIntervals, PollingManager, RemoteClient,
    RpcConfig, RpcResult, TransmissionError,
};

pub const LONG: Duration = Duration::from_secs(3600);

pub fn long_intervals() -> PollIntervals {
    PollIntervals {
        torrents: LONG,
        details: LONG,
        session: LONG,
        stats: LONG,
    }
}

/// Moves the clock far enough that every scheduled loop is due.
pub fn far_future() -> Instant {
    Instant::now() + LONG * 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fetch {
    FullSession,
    Torrents,
    Details,
    Session,
    Stats,
}

#[derive(Default)]
struct Counters {
    calls: usize,
    running: usize,
    max_running: usize,
}

/// In-memory daemon. Fetches can be made to fail or to block until released.
#[derive(Default)]
pub struct ScriptedClient {
    torrents: Mutex<Vec<String>>,
    version: Mutex<String>,
    failing: Mutex<Vec<Fetch>>,
    gates: Mutex<HashMap<Fetch, Receiver<()>>>,
    counters: Mutex<HashMap<Fetch, Counters>>,
    detail_requests: Mutex<Vec<i64>>,
}

impl ScriptedClient {
    pub fn set_torrents(&self, names: &[&str]) {
        *self.torrents.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_string();
    }

    pub fn set_failing(&self, fetch: Fetch, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        set.retain(|f| *f != fetch);
        if failing {
            set.push(fetch);
        }
    }

    /// Fetches of this kind block until a message is sent or the sender is
    /// dropped.
    pub fn hold(&self, fetch: Fetch) -> Sender<()> {
        let (tx, rx) = unbounded();
        self.gates.lock().unwrap().insert(fetch, rx);
        tx
    }

    pub fn calls(&self, fetch: Fetch) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(&fetch)
            .map_or(0, |c| c.calls)
    }

    pub fn running(&self, fetch: Fetch) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(&fetch)
            .map_or(0, |c| c.running)
    }

    pub fn max_running(&self, fetch: Fetch) -> usize {
        self.counters
            .lock()
            .unwrap()
            .get(&fetch)
            .map_or(0, |c| c.max_running)
    }

    pub fn detail_requests(&self) -> Vec<i64> {
        self.detail_requests.lock().unwrap().clone()
    }

    fn run<T>(&self, fetch: Fetch, make: impl FnOnce() -> T) -> RpcResult<T> {
        {
            let mut counters = self.counters.lock().unwrap();
            let counter = counters.entry(fetch).or_default();
            counter.calls += 1;
            counter.running += 1;
            counter.max_running = counter.max_running.max(counter.running);
        }
        let gate = self.gates.lock().unwrap().get(&fetch).cloned();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        let failing = self.failing.lock().unwrap().contains(&fetch);
        let result = if failing {
            Err(TransmissionError::Rpc(format!("{fetch:?} unavailable")))
        } else {
            Ok(make())
        };
        if let Some(counter) = self.counters.lock().unwrap().get_mut(&fetch) {
            counter.running -= 1;
        }
        result
    }

    fn session(&self) -> Session {
        Session {
            version: Some(self.version.lock().unwrap().clone()),
            ..Session::default()
        }
    }
}

pub fn summary(id: i64, name: &str) -> TorrentSummary {
    TorrentSummary {
        torrent_id: id,
        name: name.to_string(),
        status: "seeding".to_string(),
        percent_done: 1.0,
        rate_download: 0,
        rate_upload: 0,
        eta: None,
        upload_ratio: 1.0,
        size_when_done: 1024,
        left_until_done: 0,
        download_dir: "/downloads".to_string(),
        peers_connected: 0,
        peers_sending: 0,
        peers_receiving: 0,
        error: None,
    }
}

impl RemoteClient for ScriptedClient {
    fn fetch_full_session(&self) -> RpcResult<Session> {
        self.run(Fetch::FullSession, || self.session())
    }

    fn fetch_torrent_list(&self) -> RpcResult<Vec<TorrentSummary>> {
        self.run(Fetch::Torrents, || {
            self.torrents
                .lock()
                .unwrap()
                .iter()
                .enumerate()
                .map(|(idx, name)| summary(idx as i64 + 1, name))
                .collect()
        })
    }

    fn fetch_torrent_details(&self, id: i64) -> RpcResult<TorrentDetail> {
        self.detail_requests.lock().unwrap().push(id);
        self.run(Fetch::Details, || TorrentDetail {
            torrent_id: id,
            name: format!("torrent-{id}"),
            hash: format!("{id:040x}"),
            comment: String::new(),
            creator: String::new(),
            added: None,
            done: None,
            piece_count: 0,
            piece_size: 0,
            files: Vec::new(),
            peers: Vec::new(),
            trackers: Vec::new(),
        })
    }

    fn fetch_session_info(&self) -> RpcResult<Session> {
        self.run(Fetch::Session, || self.session())
    }

    fn fetch_session_stats(&self) -> RpcResult<SessionStats> {
        self.run(Fetch::Stats, || SessionStats {
            download_speed: 100,
            total_torrents: 2,
            ..SessionStats::default()
        })
    }
}

/// Hands out one shared scripted client per server id.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    clients: Arc<Mutex<HashMap<String, Arc<ScriptedClient>>>>,
    connects: Arc<Mutex<usize>>,
}

impl ScriptedFactory {
    pub fn client(&self, server: &str) -> Arc<ScriptedClient> {
        self.clients
            .lock()
            .unwrap()
            .entry(server.to_string())
            .or_insert_with(|| {
                let client = ScriptedClient::default();
                client.set_torrents(&["debian.iso", "arch.iso"]);
                client.set_version("4.0.5");
                Arc::new(client)
            })
            .clone()
    }

    pub fn connects(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl ClientFactory for ScriptedFactory {
    fn connect(&self, server: &str, _connection: RpcConfig) -> RpcResult<Arc<dyn RemoteClient>> {
        *self.connects.lock().unwrap() += 1;
        Ok(self.client(server))
    }
}

/// Knows a fixed set of servers.
pub struct StaticStore(pub Vec<&'static str>);

impl ConfigStore for StaticStore {
    fn server_connection(&self, server: &str) -> Option<RpcConfig> {
        self.0.iter().any(|s| *s == server).then(|| RpcConfig {
            scheme: "http".to_string(),
            host: format!("{server}.lan"),
            port: 9091,
            path: "/transmission/rpc".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
            verify_ssl: true,
            user_agent: "tests".to_string(),
            url: None,
        })
    }
}

pub fn manager(servers: Vec<&'static str>) -> (PollingManager, ScriptedFactory) {
    manager_with(servers, long_intervals())
}

pub fn manager_with(
    servers: Vec<&'static str>,
    intervals: PollIntervals,
) -> (PollingManager, ScriptedFactory) {
    let factory = ScriptedFactory::default();
    let manager = PollingManager::new(StaticStore(servers), factory.clone(), intervals);
    (manager, factory)
}

/// Everything the listeners saw, in order.
#[derive(Default)]
pub struct Recorded {
    pub torrents: Vec<(String, Vec<String>)>,
    pub details: Vec<(String, Option<i64>)>,
    pub sessions: Vec<(String, Option<String>)>,
    pub stats: Vec<String>,
}

/// Keeps the listener closures alive for as long as the test needs them.
pub struct Recorder {
    pub events: Arc<Mutex<Recorded>>,
    pub torrents: Arc<TorrentsListener>,
    pub details: Arc<DetailsListener>,
    pub session: Arc<SessionListener>,
    pub stats: Arc<StatsListener>,
}

impl Recorder {
    pub fn new() -> Self {
        let events = Arc::new(Mutex::new(Recorded::default()));
        let sink = events.clone();
        let torrents: Arc<TorrentsListener> =
            Arc::new(move |server: &str, list: &[TorrentSummary]| {
                let names = list.iter().map(|t| t.name.clone()).collect();
                sink.lock().unwrap().torrents.push((server.to_string(), names));
            });
        let sink = events.clone();
        let details: Arc<DetailsListener> =
            Arc::new(move |server: &str, detail: Option<&TorrentDetail>| {
                let id = detail.map(|d| d.torrent_id);
                sink.lock().unwrap().details.push((server.to_string(), id));
            });
        let sink = events.clone();
        let session: Arc<SessionListener> = Arc::new(move |server: &str, session: &Session| {
            sink.lock()
                .unwrap()
                .sessions
                .push((server.to_string(), session.version.clone()));
        });
        let sink = events.clone();
        let stats: Arc<StatsListener> = Arc::new(move |server: &str, _: &SessionStats| {
            sink.lock().unwrap().stats.push(server.to_string());
        });
        Self {
            events,
            torrents,
            details,
            session,
            stats,
        }
    }

    /// Registers everything except the stats listener.
    pub fn attach(&self, manager: &mut PollingManager) {
        manager.set_torrents_listener(Some(&self.torrents));
        manager.set_details_listener(Some(&self.details));
        manager.set_session_listener(Some(&self.session));
    }

    pub fn torrents(&self) -> Vec<(String, Vec<String>)> {
        self.events.lock().unwrap().torrents.clone()
    }

    pub fn details(&self) -> Vec<(String, Option<i64>)> {
        self.events.lock().unwrap().details.clone()
    }

    pub fn sessions(&self) -> Vec<(String, Option<String>)> {
        self.events.lock().unwrap().sessions.clone()
    }

    pub fn stats(&self) -> Vec<String> {
        self.events.lock().unwrap().stats.clone()
    }
}

/// Pumps until `done` holds; false if that takes longer than five seconds.
pub fn pump_until(manager: &mut PollingManager, mut done: impl FnMut(&PollingManager) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done(manager) {
            return true;
        }
        manager.pump(Duration::from_millis(10));
    }
    done(manager)
}

/// Pumps for a fixed span so late results get a chance to arrive.
pub fn pump_for(manager: &mut PollingManager, span: Duration) {
    let deadline = Instant::now() + span;
    while Instant::now() < deadline {
        manager.pump(Duration::from_millis(10));
    }
}

pub fn is_scheduled(manager: &PollingManager, server: &str, kind: LoopKind) -> bool {
    matches!(
        manager.loop_state(server, kind),
        Some(transmission_poller::LoopState::Scheduled(_))
    )
}

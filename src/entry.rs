use std::{fmt, sync::Arc};

use crate::{
    model::{SessionStats, TorrentDetail, TorrentSummary},
    remote::RemoteClient,
    session::Session,
    timers::TimerKey,
};

/// The independent polling concerns run for every open server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoopKind {
    Torrents,
    Details,
    Session,
    SessionStats,
}

impl LoopKind {
    pub const ALL: [LoopKind; 4] = [
        LoopKind::Torrents,
        LoopKind::Details,
        LoopKind::Session,
        LoopKind::SessionStats,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LoopKind::Torrents => "torrents",
            LoopKind::Details => "details",
            LoopKind::Session => "session",
            LoopKind::SessionStats => "sessionstats",
        }
    }

    fn index(self) -> usize {
        match self {
            LoopKind::Torrents => 0,
            LoopKind::Details => 1,
            LoopKind::Session => 2,
            LoopKind::SessionStats => 3,
        }
    }
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where one loop of one server currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Stopped,
    /// Next fetch waits on this deadline.
    Scheduled(TimerKey),
    /// A fetch is outstanding; the tag says what happens once it resolves.
    InFlight(AfterFetch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFetch {
    /// Wait out the interval, then fetch again.
    Reschedule,
    /// Fetch again immediately; the loop was restarted mid-flight.
    Restart,
    /// Stop once the fetch resolves.
    Stop,
}

/// Side effect the manager owes after a loop state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Idle,
    Fetch,
    Cancel(TimerKey),
    CancelThenFetch(TimerKey),
}

/// What a resolved fetch leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    Reschedule,
    FetchNow,
    Stopped,
}

impl LoopState {
    /// True unless the loop is stopped or will stop once its fetch resolves.
    pub fn is_running(&self) -> bool {
        !matches!(self, LoopState::Stopped | LoopState::InFlight(AfterFetch::Stop))
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, LoopState::InFlight(_))
    }

    /// Starting a running loop does nothing.
    pub(crate) fn start(&mut self) -> Step {
        match *self {
            LoopState::Stopped => Step::Fetch,
            LoopState::InFlight(AfterFetch::Stop) => {
                *self = LoopState::InFlight(AfterFetch::Reschedule);
                Step::Idle
            }
            LoopState::Scheduled(_) | LoopState::InFlight(_) => Step::Idle,
        }
    }

    /// An outstanding fetch cannot be aborted, only told not to reschedule.
    pub(crate) fn stop(&mut self) -> Step {
        match *self {
            LoopState::Stopped => Step::Idle,
            LoopState::Scheduled(key) => {
                *self = LoopState::Stopped;
                Step::Cancel(key)
            }
            LoopState::InFlight(_) => {
                *self = LoopState::InFlight(AfterFetch::Stop);
                Step::Idle
            }
        }
    }

    /// Fetch as soon as possible without ever having two fetches outstanding.
    pub(crate) fn restart(&mut self) -> Step {
        match *self {
            LoopState::Stopped => Step::Fetch,
            LoopState::Scheduled(key) => {
                *self = LoopState::Stopped;
                Step::CancelThenFetch(key)
            }
            LoopState::InFlight(_) => {
                *self = LoopState::InFlight(AfterFetch::Restart);
                Step::Idle
            }
        }
    }

    pub(crate) fn resolve(&mut self) -> Resolution {
        match *self {
            LoopState::InFlight(AfterFetch::Reschedule) => Resolution::Reschedule,
            LoopState::InFlight(AfterFetch::Restart) => Resolution::FetchNow,
            LoopState::InFlight(AfterFetch::Stop) => {
                *self = LoopState::Stopped;
                Resolution::Stopped
            }
            LoopState::Stopped | LoopState::Scheduled(_) => Resolution::Stopped,
        }
    }
}

/// Everything the manager knows about one open server.
pub struct ServerEntry {
    pub(crate) epoch: u64,
    pub(crate) client: Arc<dyn RemoteClient>,
    pub(crate) hostname: String,
    pub(crate) torrents: Vec<TorrentSummary>,
    pub(crate) torrent_details: Option<TorrentDetail>,
    pub(crate) session: Session,
    pub(crate) session_stats: Option<SessionStats>,
    pub(crate) details_subject: Option<i64>,
    /// Set once a session loop result lands; the open-time full session
    /// fetch must not overwrite it afterwards.
    pub(crate) session_polled: bool,
    loops: [LoopState; 4],
}

impl ServerEntry {
    pub(crate) fn new(epoch: u64, client: Arc<dyn RemoteClient>, hostname: String) -> Self {
        Self {
            epoch,
            client,
            hostname,
            torrents: Vec::new(),
            torrent_details: None,
            session: Session::default(),
            session_stats: None,
            details_subject: None,
            session_polled: false,
            loops: [LoopState::Stopped; 4],
        }
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn torrents(&self) -> &[TorrentSummary] {
        &self.torrents
    }

    pub fn torrent_details(&self) -> Option<&TorrentDetail> {
        self.torrent_details.as_ref()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_stats(&self) -> Option<&SessionStats> {
        self.session_stats.as_ref()
    }

    pub fn details_subject(&self) -> Option<i64> {
        self.details_subject
    }

    pub fn loop_state(&self, kind: LoopKind) -> LoopState {
        self.loops[kind.index()]
    }

    pub(crate) fn loop_state_mut(&mut self, kind: LoopKind) -> &mut LoopState {
        &mut self.loops[kind.index()]
    }
}

impl fmt::Debug for ServerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEntry")
            .field("epoch", &self.epoch)
            .field("hostname", &self.hostname)
            .field("torrents", &self.torrents.len())
            .field("details_subject", &self.details_subject)
            .field("loops", &self.loops)
            .finish_non_exhaustive()
    }
}

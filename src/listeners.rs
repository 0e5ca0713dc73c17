use std::sync::{Arc, Weak};

use crate::{
    model::{SessionStats, TorrentDetail, TorrentSummary},
    session::Session,
};

pub type TorrentsListener = dyn Fn(&str, &[TorrentSummary]) + Send + Sync;
/// Receives `None` when the detail subject could not be fetched.
pub type DetailsListener = dyn Fn(&str, Option<&TorrentDetail>) + Send + Sync;
pub type SessionListener = dyn Fn(&str, &Session) + Send + Sync;
pub type StatsListener = dyn Fn(&str, &SessionStats) + Send + Sync;

/// Single-slot weak subscription; the caller keeps the listener alive.
pub(crate) struct Slot<L: ?Sized>(Option<Weak<L>>);

impl<L: ?Sized> Default for Slot<L> {
    fn default() -> Self {
        Self(None)
    }
}

impl<L: ?Sized> Slot<L> {
    pub(crate) fn set(&mut self, listener: Option<&Arc<L>>) {
        self.0 = listener.map(Arc::downgrade);
    }

    pub(crate) fn get(&self) -> Option<Arc<L>> {
        self.0.as_ref()?.upgrade()
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.0.as_ref().is_some_and(|weak| weak.strong_count() > 0)
    }
}

#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) torrents: Slot<TorrentsListener>,
    pub(crate) details: Slot<DetailsListener>,
    pub(crate) session: Slot<SessionListener>,
    pub(crate) stats: Slot<StatsListener>,
}

/// Events surface only for the server that is active when they are delivered.
fn deliverable(active: Option<&str>, server: &str) -> bool {
    active == Some(server)
}

impl Listeners {
    pub(crate) fn torrents_changed(
        &self,
        active: Option<&str>,
        server: &str,
        torrents: &[TorrentSummary],
    ) {
        if !deliverable(active, server) {
            return;
        }
        if let Some(listener) = self.torrents.get() {
            listener(server, torrents);
        }
    }

    pub(crate) fn details_changed(
        &self,
        active: Option<&str>,
        server: &str,
        details: Option<&TorrentDetail>,
    ) {
        if !deliverable(active, server) {
            return;
        }
        if let Some(listener) = self.details.get() {
            listener(server, details);
        }
    }

    pub(crate) fn session_changed(&self, active: Option<&str>, server: &str, session: &Session) {
        if !deliverable(active, server) {
            return;
        }
        if let Some(listener) = self.session.get() {
            listener(server, session);
        }
    }

    pub(crate) fn stats_changed(&self, active: Option<&str>, server: &str, stats: &SessionStats) {
        if !deliverable(active, server) {
            return;
        }
        if let Some(listener) = self.stats.get() {
            listener(server, stats);
        }
    }
}

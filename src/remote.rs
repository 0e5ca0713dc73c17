//! Seams between the polling core and the daemon it talks to.

use std::sync::Arc;

use crate::{
    config::RpcConfig,
    model::{SessionStats, TorrentDetail, TorrentSummary},
    rpc::{RpcResult, TransmissionClient},
    session::Session,
};

/// One handle per open server. Calls block until the daemon answers or the
/// client's own timeout fires; the polling manager runs them off its thread.
pub trait RemoteClient: Send + Sync {
    fn fetch_full_session(&self) -> RpcResult<Session>;
    fn fetch_torrent_list(&self) -> RpcResult<Vec<TorrentSummary>>;
    fn fetch_torrent_details(&self, id: i64) -> RpcResult<TorrentDetail>;
    fn fetch_session_info(&self) -> RpcResult<Session>;
    fn fetch_session_stats(&self) -> RpcResult<SessionStats>;
}

pub trait ClientFactory {
    fn connect(&self, server: &str, connection: RpcConfig) -> RpcResult<Arc<dyn RemoteClient>>;
}

/// Builds real HTTP clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn connect(&self, server: &str, connection: RpcConfig) -> RpcResult<Arc<dyn RemoteClient>> {
        let client = TransmissionClient::new(connection)?;
        log::debug!("{server}: rpc client targets {}", client.endpoint());
        Ok(Arc::new(client))
    }
}

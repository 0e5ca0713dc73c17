use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use reqwest::{blocking::Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::{serde_as, DefaultOnNull};
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    config::RpcConfig,
    model::{
        FileEntry, PeerSummary, SessionStats, TorrentDetail, TorrentSummary, TrackerSummary,
        TransferTotals,
    },
    remote::RemoteClient,
    session::{Session, SessionResponse, SESSION_FIELDS},
};

const SESSION_HEADER: &str = "X-Transmission-Session-Id";

/// A 409 hands out a fresh session id; a second 409 in a row means the
/// daemon is not accepting the one it just gave us.
const MAX_SESSION_RENEGOTIATIONS: usize = 2;

#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication failed")]
    Authentication,
    #[error("session negotiation failed")]
    Session,
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("response parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("torrent {0} not found")]
    NotFound(i64),
    #[error("fetch worker failed to start: {0}")]
    Worker(#[from] std::io::Error),
}

pub type RpcResult<T> = std::result::Result<T, TransmissionError>;

const SUMMARY_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "percentDone",
    "rateDownload",
    "rateUpload",
    "eta",
    "uploadRatio",
    "sizeWhenDone",
    "leftUntilDone",
    "downloadDir",
    "peersConnected",
    "peersSendingToUs",
    "peersGettingFromUs",
    "errorString",
];

const DETAIL_FIELDS: &[&str] = &[
    "id",
    "name",
    "hashString",
    "comment",
    "creator",
    "addedDate",
    "doneDate",
    "pieceCount",
    "pieceSize",
    "files",
    "fileStats",
    "peers",
    "trackerStats",
];

pub struct TransmissionClient {
    http: Client,
    endpoint: String,
    auth: Option<(String, Option<String>)>,
    session_id: Mutex<Option<String>>,
    counter: AtomicU64,
}

impl TransmissionClient {
    pub fn new(config: RpcConfig) -> RpcResult<Self> {
        let endpoint = config.endpoint();
        let RpcConfig {
            username,
            password,
            timeout,
            verify_ssl,
            user_agent,
            ..
        } = config;
        let mut builder = Client::builder().timeout(timeout).user_agent(user_agent);
        if !verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;
        let auth = username.map(|user| (user, password));
        Ok(Self {
            http,
            endpoint,
            auth,
            session_id: Mutex::new(None),
            counter: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_get(&self, fields: &[&str]) -> RpcResult<Session> {
        let args = if fields.is_empty() {
            None
        } else {
            Some(json!({"fields": fields}))
        };
        let response: SessionResponse = self.call("session-get", args)?;
        Ok(Session::from(response))
    }

    fn torrent_get<T>(&self, fields: &[&str], ids: Option<&[i64]>) -> RpcResult<Vec<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let args = match ids {
            Some(ids) => json!({"fields": fields, "ids": ids}),
            None => json!({"fields": fields}),
        };
        let response: TorrentGetResponse<T> = self.call("torrent-get", Some(args))?;
        Ok(response.torrents)
    }

    fn call<T>(&self, method: &str, arguments: Option<Value>) -> RpcResult<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self.call_raw(method, arguments)?;
        serde_json::from_value(value).map_err(TransmissionError::from)
    }

    fn call_raw(&self, method: &str, arguments: Option<Value>) -> RpcResult<Value> {
        let payload = RpcRequest {
            method,
            arguments,
            tag: self.counter.fetch_add(1, Ordering::Relaxed),
        };
        let mut renegotiations = 0;
        loop {
            let mut request = self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .json(&payload);
            if let Some((user, pass)) = &self.auth {
                request = request.basic_auth(user, pass.as_ref());
            }
            let session_header = match self.session_id.lock() {
                Ok(guard) => (*guard).clone(),
                Err(_) => None,
            };
            if let Some(session) = session_header {
                request = request.header(SESSION_HEADER, session);
            }
            let response = request.send()?;
            match response.status() {
                StatusCode::CONFLICT => {
                    renegotiations += 1;
                    if renegotiations > MAX_SESSION_RENEGOTIATIONS {
                        return Err(TransmissionError::Session);
                    }
                    let Some(id) = response.headers().get(SESSION_HEADER) else {
                        return Err(TransmissionError::Session);
                    };
                    let value = id
                        .to_str()
                        .map_err(|_| TransmissionError::Session)?
                        .to_string();
                    log::debug!("{}: negotiated new rpc session id", self.endpoint);
                    if let Ok(mut guard) = self.session_id.lock() {
                        *guard = Some(value);
                    }
                }
                StatusCode::UNAUTHORIZED => return Err(TransmissionError::Authentication),
                status if !status.is_success() => {
                    return Err(TransmissionError::HttpStatus(status));
                }
                _ => {
                    let body: RpcResponse = response.json()?;
                    if body.result != "success" {
                        return Err(TransmissionError::Rpc(body.result));
                    }
                    return Ok(body.arguments.unwrap_or(Value::Null));
                }
            }
        }
    }
}

impl RemoteClient for TransmissionClient {
    fn fetch_full_session(&self) -> RpcResult<Session> {
        self.session_get(&[])
    }

    fn fetch_torrent_list(&self) -> RpcResult<Vec<TorrentSummary>> {
        let torrents: Vec<TorrentWire> = self.torrent_get(SUMMARY_FIELDS, None)?;
        Ok(torrents.into_iter().map(TorrentSummary::from).collect())
    }

    fn fetch_torrent_details(&self, id: i64) -> RpcResult<TorrentDetail> {
        let torrents: Vec<DetailWire> = self.torrent_get(DETAIL_FIELDS, Some(&[id][..]))?;
        torrents
            .into_iter()
            .find(|wire| wire.id == id)
            .map(TorrentDetail::from)
            .ok_or(TransmissionError::NotFound(id))
    }

    fn fetch_session_info(&self) -> RpcResult<Session> {
        self.session_get(SESSION_FIELDS)
    }

    fn fetch_session_stats(&self) -> RpcResult<SessionStats> {
        let stats: StatsWire = self.call("session-stats", None)?;
        Ok(SessionStats::from(stats))
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,
    tag: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    arguments: Option<Value>,
    result: String,
}

#[derive(Debug, Deserialize)]
struct TorrentGetResponse<T> {
    #[serde(default = "Vec::new")]
    torrents: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct StatsWire {
    #[serde(default, alias = "activeTorrentCount")]
    active_torrent_count: i64,
    #[serde(default, alias = "pausedTorrentCount")]
    paused_torrent_count: i64,
    #[serde(default, alias = "torrentCount")]
    torrent_count: i64,
    #[serde(default, alias = "downloadSpeed")]
    download_speed: i64,
    #[serde(default, alias = "uploadSpeed")]
    upload_speed: i64,
    #[serde(default, rename = "current-stats", alias = "current_stats")]
    current_stats: TotalsWire,
    #[serde(default, rename = "cumulative-stats", alias = "cumulative_stats")]
    cumulative_stats: TotalsWire,
}

#[derive(Debug, Default, Deserialize)]
struct TotalsWire {
    #[serde(default, alias = "downloadedBytes")]
    downloaded_bytes: i64,
    #[serde(default, alias = "uploadedBytes")]
    uploaded_bytes: i64,
    #[serde(default, alias = "filesAdded")]
    files_added: i64,
    #[serde(default, alias = "sessionCount")]
    session_count: i64,
    #[serde(default, alias = "secondsActive")]
    seconds_active: i64,
}

impl From<TotalsWire> for TransferTotals {
    fn from(wire: TotalsWire) -> Self {
        Self {
            downloaded_bytes: wire.downloaded_bytes,
            uploaded_bytes: wire.uploaded_bytes,
            files_added: wire.files_added,
            session_count: wire.session_count,
            seconds_active: wire.seconds_active,
        }
    }
}

impl From<StatsWire> for SessionStats {
    fn from(wire: StatsWire) -> Self {
        Self {
            download_speed: wire.download_speed,
            upload_speed: wire.upload_speed,
            active_torrents: wire.active_torrent_count,
            paused_torrents: wire.paused_torrent_count,
            total_torrents: wire.torrent_count,
            current: wire.current_stats.into(),
            cumulative: wire.cumulative_stats.into(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct TorrentWire {
    id: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: i64,
    #[serde(default, alias = "percentDone")]
    percent_done: f64,
    #[serde(default, alias = "rateDownload")]
    rate_download: i64,
    #[serde(default, alias = "rateUpload")]
    rate_upload: i64,
    #[serde(default)]
    eta: i64,
    #[serde(default, alias = "uploadRatio")]
    upload_ratio: f64,
    #[serde(default, alias = "sizeWhenDone")]
    size_when_done: i64,
    #[serde(default, alias = "leftUntilDone")]
    left_until_done: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default, alias = "downloadDir")]
    download_dir: String,
    #[serde(default, alias = "peersConnected")]
    peers_connected: i64,
    #[serde(default, alias = "peersSendingToUs")]
    peers_sending_to_us: i64,
    #[serde(default, alias = "peersGettingFromUs")]
    peers_getting_from_us: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default, alias = "errorString")]
    error_string: String,
}

fn status_label(code: i64) -> String {
    match code {
        0 => "stopped".to_string(),
        1 => "check-wait".to_string(),
        2 => "checking".to_string(),
        3 => "download-wait".to_string(),
        4 => "downloading".to_string(),
        5 => "seed-wait".to_string(),
        6 => "seeding".to_string(),
        other => format!("status-{}", other),
    }
}

impl From<TorrentWire> for TorrentSummary {
    fn from(wire: TorrentWire) -> Self {
        TorrentSummary {
            torrent_id: wire.id,
            name: wire.name,
            status: status_label(wire.status),
            percent_done: wire.percent_done,
            rate_download: wire.rate_download,
            rate_upload: wire.rate_upload,
            eta: (wire.eta >= 0).then_some(wire.eta),
            upload_ratio: wire.upload_ratio,
            size_when_done: wire.size_when_done,
            left_until_done: wire.left_until_done,
            download_dir: wire.download_dir,
            peers_connected: wire.peers_connected,
            peers_sending: wire.peers_sending_to_us,
            peers_receiving: wire.peers_getting_from_us,
            error: Some(wire.error_string).filter(|e| !e.is_empty()),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
struct DetailWire {
    id: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    name: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default, alias = "hashString")]
    hash_string: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    comment: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    creator: String,
    #[serde(default, alias = "addedDate")]
    added_date: i64,
    #[serde(default, alias = "doneDate")]
    done_date: i64,
    #[serde(default, alias = "pieceCount")]
    piece_count: i64,
    #[serde(default, alias = "pieceSize")]
    piece_size: i64,
    #[serde(default)]
    files: Vec<FileWire>,
    #[serde(default, alias = "fileStats")]
    file_stats: Vec<FileStatWire>,
    #[serde(default)]
    peers: Vec<PeerWire>,
    #[serde(default, alias = "trackerStats")]
    tracker_stats: Vec<TrackerWire>,
}

#[derive(Debug, Deserialize)]
struct FileWire {
    #[serde(default)]
    name: String,
    #[serde(default)]
    length: i64,
    #[serde(default, alias = "bytesCompleted")]
    bytes_completed: i64,
}

#[derive(Debug, Deserialize)]
struct FileStatWire {
    #[serde(default = "default_wanted")]
    wanted: bool,
    #[serde(default)]
    priority: i64,
}

fn default_wanted() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct PeerWire {
    #[serde(default)]
    address: String,
    #[serde(default, alias = "clientName")]
    client_name: String,
    #[serde(default)]
    progress: f64,
    #[serde(default, alias = "rateToClient")]
    rate_to_client: i64,
    #[serde(default, alias = "rateToPeer")]
    rate_to_peer: i64,
}

#[derive(Debug, Deserialize)]
struct TrackerWire {
    #[serde(default)]
    announce: String,
    #[serde(default)]
    tier: i64,
    #[serde(default, alias = "seederCount")]
    seeder_count: i64,
    #[serde(default, alias = "leecherCount")]
    leecher_count: i64,
    #[serde(default, alias = "lastAnnounceResult")]
    last_announce_result: String,
}

/// The daemon reports unknown dates as 0 and unknown swarm counts as -1.
fn unix_date(secs: i64) -> Option<OffsetDateTime> {
    if secs <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

fn known_count(value: i64) -> Option<i64> {
    (value >= 0).then_some(value)
}

impl From<DetailWire> for TorrentDetail {
    fn from(wire: DetailWire) -> Self {
        let mut stats = wire.file_stats.into_iter();
        let files = wire
            .files
            .into_iter()
            .map(|file| {
                let stat = stats.next();
                FileEntry {
                    name: file.name,
                    length: file.length,
                    bytes_completed: file.bytes_completed,
                    wanted: stat.as_ref().map(|s| s.wanted).unwrap_or(true),
                    priority: stat.map(|s| s.priority).unwrap_or(0),
                }
            })
            .collect();
        TorrentDetail {
            torrent_id: wire.id,
            name: wire.name,
            hash: wire.hash_string,
            comment: wire.comment,
            creator: wire.creator,
            added: unix_date(wire.added_date),
            done: unix_date(wire.done_date),
            piece_count: wire.piece_count,
            piece_size: wire.piece_size,
            files,
            peers: wire
                .peers
                .into_iter()
                .map(|peer| PeerSummary {
                    address: peer.address,
                    client: peer.client_name,
                    progress: peer.progress,
                    rate_down: peer.rate_to_client,
                    rate_up: peer.rate_to_peer,
                })
                .collect(),
            trackers: wire
                .tracker_stats
                .into_iter()
                .map(|tracker| TrackerSummary {
                    announce: tracker.announce,
                    tier: tracker.tier,
                    seeders: known_count(tracker.seeder_count),
                    leechers: known_count(tracker.leecher_count),
                    last_announce_result: tracker.last_announce_result,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_decodes_camel_case_and_maps_status() {
        let raw = json!({
            "torrents": [{
                "id": 7,
                "name": "debian.iso",
                "status": 4,
                "percentDone": 0.5,
                "rateDownload": 1024,
                "eta": -1,
                "errorString": "",
                "downloadDir": null
            }, {
                "id": 8,
                "status": 9,
                "errorString": "tracker gone"
            }]
        });
        let response: TorrentGetResponse<TorrentWire> = serde_json::from_value(raw).unwrap();
        let torrents: Vec<TorrentSummary> =
            response.torrents.into_iter().map(TorrentSummary::from).collect();
        assert_eq!(torrents[0].status, "downloading");
        assert_eq!(torrents[0].percent_done, 0.5);
        assert_eq!(torrents[0].eta, None);
        assert_eq!(torrents[0].error, None);
        assert_eq!(torrents[0].download_dir, "");
        assert_eq!(torrents[1].status, "status-9");
        assert_eq!(torrents[1].name, "");
        assert_eq!(torrents[1].error.as_deref(), Some("tracker gone"));
    }

    #[test]
    fn detail_zips_files_with_file_stats() {
        let raw = json!({
            "id": 3,
            "name": "album",
            "hashString": "abcd",
            "addedDate": 1_700_000_000,
            "doneDate": 0,
            "files": [
                {"name": "01.flac", "length": 100, "bytesCompleted": 100},
                {"name": "02.flac", "length": 200, "bytesCompleted": 50}
            ],
            "fileStats": [
                {"wanted": true, "priority": 1},
                {"wanted": false, "priority": -1}
            ],
            "peers": [{"address": "10.0.0.2", "clientName": "qBittorrent", "rateToClient": 10}],
            "trackerStats": [{"announce": "udp://t", "tier": 0, "seederCount": -1, "leecherCount": 4}]
        });
        let wire: DetailWire = serde_json::from_value(raw).unwrap();
        let detail = TorrentDetail::from(wire);
        assert_eq!(detail.hash, "abcd");
        assert!(detail.added.is_some());
        assert_eq!(detail.done, None);
        assert_eq!(detail.files.len(), 2);
        assert_eq!(detail.files[0].priority, 1);
        assert!(!detail.files[1].wanted);
        assert_eq!(detail.peers[0].client, "qBittorrent");
        assert_eq!(detail.peers[0].rate_down, 10);
        assert_eq!(detail.trackers[0].seeders, None);
        assert_eq!(detail.trackers[0].leechers, Some(4));
    }

    #[test]
    fn stats_decode_nested_totals() {
        let raw = json!({
            "activeTorrentCount": 2,
            "torrentCount": 5,
            "downloadSpeed": 300,
            "cumulative-stats": {"downloadedBytes": 9000, "sessionCount": 12}
        });
        let wire: StatsWire = serde_json::from_value(raw).unwrap();
        let stats = SessionStats::from(wire);
        assert_eq!(stats.active_torrents, 2);
        assert_eq!(stats.total_torrents, 5);
        assert_eq!(stats.download_speed, 300);
        assert_eq!(stats.cumulative.downloaded_bytes, 9000);
        assert_eq!(stats.cumulative.session_count, 12);
        assert_eq!(stats.current, TransferTotals::default());
    }
}

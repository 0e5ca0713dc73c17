use serde::Deserialize;

/// Daemon configuration as last reported by `session-get`.
///
/// A fresh server entry starts from `Session::default()` until the first
/// session fetch lands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub version: Option<String>,
    pub rpc_version: Option<i64>,
    pub download_dir: String,
    pub start_when_added: bool,
    pub speed_limit_up_enabled: bool,
    pub speed_limit_up: u32,
    pub speed_limit_down_enabled: bool,
    pub speed_limit_down: u32,
    pub alt_speed_enabled: bool,
    pub seed_ratio_limited: bool,
    pub seed_ratio_limit: f64,
    pub idle_seeding_limit_enabled: bool,
    pub idle_seeding_limit: u32,
    pub peer_limit_per_torrent: u32,
    pub peer_limit_global: u32,
    pub peer_port: Option<u16>,
    pub encryption_mode: EncryptionMode,
    pub pex_enabled: bool,
    pub dht_enabled: bool,
    pub lpd_enabled: bool,
    pub blocklist_enabled: bool,
    pub blocklist_url: Option<String>,
}

impl Session {
    pub fn version_label(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    #[default]
    Prefer,
    Allow,
    Require,
}

impl EncryptionMode {
    pub fn label(self) -> &'static str {
        match self {
            EncryptionMode::Prefer => "Prefer encryption",
            EncryptionMode::Allow => "Allow encryption",
            EncryptionMode::Require => "Require encryption",
        }
    }

    pub fn from_rpc(value: &str) -> Self {
        match value {
            "required" => EncryptionMode::Require,
            "allowed" => EncryptionMode::Allow,
            "tolerated" => EncryptionMode::Allow,
            _ => EncryptionMode::Prefer,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionResponse {
    version: Option<String>,
    #[serde(rename = "rpc_version", alias = "rpc-version")]
    rpc_version: Option<i64>,
    #[serde(rename = "download_dir", alias = "download-dir")]
    download_dir: Option<String>,
    #[serde(rename = "start_added_torrents", alias = "start-added-torrents")]
    start_added_torrents: Option<bool>,
    #[serde(rename = "speed_limit_up", alias = "speed-limit-up")]
    speed_limit_up: Option<i64>,
    #[serde(rename = "speed_limit_up_enabled", alias = "speed-limit-up-enabled")]
    speed_limit_up_enabled: Option<bool>,
    #[serde(rename = "speed_limit_down", alias = "speed-limit-down")]
    speed_limit_down: Option<i64>,
    #[serde(
        rename = "speed_limit_down_enabled",
        alias = "speed-limit-down-enabled"
    )]
    speed_limit_down_enabled: Option<bool>,
    #[serde(rename = "alt_speed_enabled", alias = "alt-speed-enabled")]
    alt_speed_enabled: Option<bool>,
    #[serde(rename = "seed_ratio_limited", alias = "seedRatioLimited")]
    seed_ratio_limited: Option<bool>,
    #[serde(rename = "seed_ratio_limit", alias = "seedRatioLimit")]
    seed_ratio_limit: Option<f64>,
    #[serde(
        rename = "idle_seeding_limit_enabled",
        alias = "idle-seeding-limit-enabled"
    )]
    idle_seeding_limit_enabled: Option<bool>,
    #[serde(rename = "idle_seeding_limit", alias = "idle-seeding-limit")]
    idle_seeding_limit: Option<i64>,
    #[serde(rename = "peer_limit_per_torrent", alias = "peer-limit-per-torrent")]
    peer_limit_per_torrent: Option<i64>,
    #[serde(rename = "peer_limit_global", alias = "peer-limit-global")]
    peer_limit_global: Option<i64>,
    #[serde(rename = "peer_port", alias = "peer-port")]
    peer_port: Option<i64>,
    #[serde(rename = "encryption")]
    encryption: Option<String>,
    #[serde(rename = "pex_enabled", alias = "pex-enabled")]
    pex_enabled: Option<bool>,
    #[serde(rename = "dht_enabled", alias = "dht-enabled")]
    dht_enabled: Option<bool>,
    #[serde(rename = "lpd_enabled", alias = "lpd-enabled")]
    lpd_enabled: Option<bool>,
    #[serde(rename = "blocklist_enabled", alias = "blocklist-enabled")]
    blocklist_enabled: Option<bool>,
    #[serde(rename = "blocklist_url", alias = "blocklist-url")]
    blocklist_url: Option<String>,
}

impl From<SessionResponse> for Session {
    fn from(value: SessionResponse) -> Self {
        Self {
            version: value.version.filter(|s| !s.is_empty()),
            rpc_version: value.rpc_version,
            download_dir: value.download_dir.unwrap_or_default(),
            start_when_added: value.start_added_torrents.unwrap_or(true),
            speed_limit_up_enabled: value.speed_limit_up_enabled.unwrap_or(false),
            speed_limit_up: clamp_u32(value.speed_limit_up, 0),
            speed_limit_down_enabled: value.speed_limit_down_enabled.unwrap_or(false),
            speed_limit_down: clamp_u32(value.speed_limit_down, 0),
            alt_speed_enabled: value.alt_speed_enabled.unwrap_or(false),
            seed_ratio_limited: value.seed_ratio_limited.unwrap_or(false),
            seed_ratio_limit: value.seed_ratio_limit.unwrap_or(2.0),
            idle_seeding_limit_enabled: value.idle_seeding_limit_enabled.unwrap_or(false),
            idle_seeding_limit: clamp_u32(value.idle_seeding_limit, 30),
            peer_limit_per_torrent: clamp_u32(value.peer_limit_per_torrent, 50),
            peer_limit_global: clamp_u32(value.peer_limit_global, 200),
            peer_port: value.peer_port.and_then(|port| u16::try_from(port).ok()),
            encryption_mode: value
                .encryption
                .as_deref()
                .map(EncryptionMode::from_rpc)
                .unwrap_or_default(),
            pex_enabled: value.pex_enabled.unwrap_or(true),
            dht_enabled: value.dht_enabled.unwrap_or(true),
            lpd_enabled: value.lpd_enabled.unwrap_or(true),
            blocklist_enabled: value.blocklist_enabled.unwrap_or(false),
            blocklist_url: value.blocklist_url.filter(|s| !s.is_empty()),
        }
    }
}

fn clamp_u32(value: Option<i64>, default: u32) -> u32 {
    value
        .map(|raw| raw.clamp(0, i64::from(u32::MAX)) as u32)
        .unwrap_or(default)
}

/// Fields requested by the periodic session poll. The one-shot full fetch
/// done on open asks for everything instead.
pub const SESSION_FIELDS: &[&str] = &[
    "version",
    "rpc-version",
    "download-dir",
    "start-added-torrents",
    "speed-limit-up",
    "speed-limit-up-enabled",
    "speed-limit-down",
    "speed-limit-down-enabled",
    "alt-speed-enabled",
    "seedRatioLimited",
    "seedRatioLimit",
    "idle-seeding-limit-enabled",
    "idle-seeding-limit",
    "peer-limit-per-torrent",
    "peer-limit-global",
    "peer-port",
    "encryption",
    "pex-enabled",
    "dht-enabled",
    "lpd-enabled",
    "blocklist-enabled",
    "blocklist-url",
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_kebab_case_session_get() {
        let raw = json!({
            "version": "4.0.5 (a6fe2a64aa)",
            "rpc-version": 17,
            "download-dir": "/srv/downloads",
            "speed-limit-down": 800,
            "speed-limit-down-enabled": true,
            "encryption": "required",
            "peer-port": 51413,
            "blocklist-url": ""
        });
        let response: SessionResponse = serde_json::from_value(raw).unwrap();
        let session = Session::from(response);
        assert_eq!(session.version_label(), "4.0.5 (a6fe2a64aa)");
        assert_eq!(session.rpc_version, Some(17));
        assert_eq!(session.download_dir, "/srv/downloads");
        assert_eq!(session.speed_limit_down, 800);
        assert!(session.speed_limit_down_enabled);
        assert_eq!(session.encryption_mode, EncryptionMode::Require);
        assert_eq!(session.peer_port, Some(51413));
        assert_eq!(session.blocklist_url, None);
    }

    #[test]
    fn missing_fields_fall_back_to_daemon_defaults() {
        let session = Session::from(SessionResponse::default());
        assert_eq!(session.version_label(), "unknown");
        assert!(session.start_when_added);
        assert_eq!(session.peer_limit_global, 200);
        assert_eq!(session.idle_seeding_limit, 30);
        assert_eq!(session.encryption_mode, EncryptionMode::Prefer);
    }

    #[test]
    fn negative_limits_clamp_to_zero() {
        let raw = json!({ "speed_limit_up": -10, "peer_port": 70000 });
        let response: SessionResponse = serde_json::from_value(raw).unwrap();
        let session = Session::from(response);
        assert_eq!(session.speed_limit_up, 0);
        assert_eq!(session.peer_port, None);
    }
}

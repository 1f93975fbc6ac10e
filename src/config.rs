// Session configuration.
// Participant ids and the call id are explicit so several pairs can share one store.

use crate::error::ConfigError;
use crate::utils::add_ice_url_scheme;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Default tracing filter when `RUST_LOG` is not set
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "duocall=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// How long a caller waits before the user is told nobody answered
pub const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 60;

/// How long a disconnected peer connection may take to recover
pub const DEFAULT_DISCONNECT_GRACE_SECS: u64 = 10;

/// Public STUN servers used when nothing else is configured
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// ICE (NAT traversal helper) server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

/// Everything one participant needs to take part in one call
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub call_id: String,
    pub local_id: String,
    pub remote_id: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<ServerConfig>,
    /// `None` disables the not-answered notification
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_secs: Option<u64>,
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_secs: u64,
}

fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_ICE_SERVERS.clone()
}

fn default_answer_timeout() -> Option<u64> {
    Some(DEFAULT_ANSWER_TIMEOUT_SECS)
}

fn default_disconnect_grace() -> u64 {
    DEFAULT_DISCONNECT_GRACE_SECS
}

impl SessionConfig {
    pub fn new(
        call_id: impl Into<String>,
        local_id: impl Into<String>,
        remote_id: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            ice_servers: default_ice_servers(),
            answer_timeout_secs: default_answer_timeout(),
            disconnect_grace_secs: default_disconnect_grace(),
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(doc: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(doc)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn with_answer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.answer_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace_secs = grace.as_secs();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_id.is_empty() {
            return Err(ConfigError::MissingField("call_id"));
        }
        if self.local_id.is_empty() {
            return Err(ConfigError::MissingField("local_id"));
        }
        if self.remote_id.is_empty() {
            return Err(ConfigError::MissingField("remote_id"));
        }
        if self.local_id == self.remote_id {
            return Err(ConfigError::SameParticipant(self.local_id.clone()));
        }
        validate_ice_servers(&self.ice_servers)
    }

    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_secs.map(Duration::from_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_secs(self.disconnect_grace_secs)
    }
}

/// Rejects entries the ICE agent could not use
pub fn validate_ice_servers(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    for server in servers {
        if server.url.is_empty() {
            return Err(ConfigError::EmptyServerUrl(server.id.clone()));
        }
        match server.r#type.as_str() {
            "stun" => {}
            "turn" => {
                if server.username.is_none() || server.credential.is_none() {
                    return Err(ConfigError::MissingTurnCredentials(server.id.clone()));
                }
            }
            other => {
                return Err(ConfigError::UnknownServerType(
                    server.id.clone(),
                    other.to_string(),
                ))
            }
        }
    }
    Ok(())
}

/// Converts configured entries into webrtc-rs ICE servers
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Peer connection configuration for the given ICE servers
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

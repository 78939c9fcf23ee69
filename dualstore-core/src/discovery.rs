//! Backend discovery.
//!
//! Builds an ordered list of candidate base URLs and probes them one at a
//! time; the first healthy candidate becomes the active backend.

use std::fmt;
use std::net::IpAddr;

use reqwest::Url;
use serde::Serialize;

use crate::remote::Backend;

/// Port the backend store listens on by convention.
pub const DEFAULT_BACKEND_PORT: u16 = 3000;

/// Shown to the user when no candidate answers.
pub const UNREACHABLE_MESSAGE: &str =
    "Backend unreachable. Start dualstore-server to sync; records are kept locally until then.";

/// Inputs for building the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Explicitly configured backend, tried first.
    pub remote_url: Option<String>,
    /// Origin the client itself was served from, if any.
    pub page_origin: Option<String>,
    pub backend_port: u16,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            page_origin: None,
            backend_port: DEFAULT_BACKEND_PORT,
        }
    }
}

/// Builds the deduplicated candidate list in priority order:
/// configured URL, own origin when it is on the backend port, same host on
/// the backend port, then loopback.
pub fn candidate_urls(config: &DiscoveryConfig) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |url: String| {
        let url = url.trim().trim_end_matches('/').to_string();
        if !url.is_empty() && !candidates.contains(&url) {
            candidates.push(url);
        }
    };

    if let Some(remote) = &config.remote_url {
        push(remote.clone());
    }

    if let Some(origin) = config
        .page_origin
        .as_deref()
        .and_then(|o| Url::parse(o).ok())
    {
        if origin.port_or_known_default() == Some(config.backend_port) {
            push(origin.origin().ascii_serialization());
        }
        if let Some(host) = origin.host_str() {
            push(format!("http://{}:{}", host, config.backend_port));
        }
    }

    push(format!("http://localhost:{}", config.backend_port));
    push(format!("http://127.0.0.1:{}", config.backend_port));

    candidates
}

/// Where the selected backend lives. Display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Loopback or private network.
    Local,
    Hosted,
}

impl BackendKind {
    pub fn classify(base_url: &str) -> Self {
        let host = match Url::parse(base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
        {
            Some(host) => host,
            None => return BackendKind::Hosted,
        };

        if host.eq_ignore_ascii_case("localhost") {
            return BackendKind::Local;
        }

        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) if ip.is_loopback() || ip.is_private() || ip.is_link_local() => {
                BackendKind::Local
            }
            Ok(IpAddr::V6(ip)) if ip.is_loopback() => BackendKind::Local,
            _ => BackendKind::Hosted,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Hosted => write!(f, "hosted"),
        }
    }
}

/// Result of probing the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable { base_url: String, kind: BackendKind },
    Unreachable { tried: Vec<String> },
}

impl ProbeOutcome {
    pub fn base_url(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Reachable { base_url, .. } => Some(base_url),
            ProbeOutcome::Unreachable { .. } => None,
        }
    }

    pub fn status(&self) -> BackendStatus {
        match self {
            ProbeOutcome::Reachable { base_url, kind } => BackendStatus::Connected {
                base_url: base_url.clone(),
                kind: *kind,
            },
            ProbeOutcome::Unreachable { .. } => BackendStatus::Unreachable {
                message: UNREACHABLE_MESSAGE.to_string(),
            },
        }
    }
}

/// Connection state reported to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BackendStatus {
    Connected { base_url: String, kind: BackendKind },
    Unreachable { message: String },
}

/// Probes candidates in order and returns the first that passes its health
/// check. Never fails; total failure is `ProbeOutcome::Unreachable`.
pub async fn probe(backend: &dyn Backend, candidates: &[String]) -> ProbeOutcome {
    for base_url in candidates {
        match backend.health(base_url).await {
            Ok(()) => {
                let kind = BackendKind::classify(base_url);
                tracing::info!("Connected to {} backend at {}", kind, base_url);
                return ProbeOutcome::Reachable {
                    base_url: base_url.clone(),
                    kind,
                };
            }
            Err(e) => {
                tracing::debug!("Candidate {} failed health check: {}", base_url, e);
            }
        }
    }

    tracing::warn!(
        "No backend reachable ({} candidate(s) tried), using local mirror",
        candidates.len()
    );
    ProbeOutcome::Unreachable {
        tried: candidates.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[test]
    fn test_candidates_loopback_only() {
        let urls = candidate_urls(&DiscoveryConfig::default());
        assert_eq!(urls, vec!["http://localhost:3000", "http://127.0.0.1:3000"]);
    }

    #[test]
    fn test_candidates_priority_order() {
        let config = DiscoveryConfig {
            remote_url: Some("https://api.example.com/".into()),
            page_origin: Some("http://10.30.10.140:8000".into()),
            backend_port: 3000,
        };
        assert_eq!(
            candidate_urls(&config),
            vec![
                "https://api.example.com",
                "http://10.30.10.140:3000",
                "http://localhost:3000",
                "http://127.0.0.1:3000",
            ]
        );
    }

    #[test]
    fn test_candidates_origin_on_backend_port_is_deduplicated() {
        let config = DiscoveryConfig {
            remote_url: None,
            page_origin: Some("http://localhost:3000/index.html".into()),
            backend_port: 3000,
        };
        assert_eq!(
            candidate_urls(&config),
            vec!["http://localhost:3000", "http://127.0.0.1:3000"]
        );
    }

    #[test]
    fn test_candidates_https_origin_on_backend_port() {
        let config = DiscoveryConfig {
            remote_url: None,
            page_origin: Some("https://app.example.com:3000".into()),
            backend_port: 3000,
        };
        let urls = candidate_urls(&config);
        assert_eq!(urls[0], "https://app.example.com:3000");
        assert_eq!(urls[1], "http://app.example.com:3000");
    }

    #[test]
    fn test_classify() {
        assert_eq!(BackendKind::classify("http://localhost:3000"), BackendKind::Local);
        assert_eq!(BackendKind::classify("http://127.0.0.1:3000"), BackendKind::Local);
        assert_eq!(BackendKind::classify("http://10.30.10.140:3000"), BackendKind::Local);
        assert_eq!(BackendKind::classify("http://[::1]:3000"), BackendKind::Local);
        assert_eq!(BackendKind::classify("https://api.example.com"), BackendKind::Hosted);
    }

    #[tokio::test]
    async fn test_probe_selects_first_reachable() {
        let backend = FakeBackend::new();
        backend.set_reachable("http://b:3000", true);
        backend.set_reachable("http://c:3000", true);

        let candidates = vec![
            "http://a:3000".to_string(),
            "http://b:3000".to_string(),
            "http://c:3000".to_string(),
        ];
        let outcome = probe(&backend, &candidates).await;

        assert_eq!(outcome.base_url(), Some("http://b:3000"));
        // Sequential: the later candidate is never contacted
        assert_eq!(backend.health_calls(), vec!["http://a:3000", "http://b:3000"]);
    }

    #[tokio::test]
    async fn test_probe_unreachable() {
        let backend = FakeBackend::new();
        let candidates = vec!["http://a:3000".to_string()];

        let outcome = probe(&backend, &candidates).await;

        assert_eq!(
            outcome,
            ProbeOutcome::Unreachable {
                tried: candidates.clone()
            }
        );
        assert_eq!(
            outcome.status(),
            BackendStatus::Unreachable {
                message: UNREACHABLE_MESSAGE.to_string()
            }
        );
    }
}

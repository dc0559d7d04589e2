//! Origin policy for WebSocket upgrade requests.

use crate::config::ServerConfig;

/// Which `Origin` headers may open a broadcast connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Accept every origin. Suitable for local or demo deployments only.
    Any,
    /// Accept same-host origins plus an explicit allow list.
    SameHostOr(Vec<String>),
}

impl OriginPolicy {
    /// Build the policy described by `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        if config.allow_any_origin {
            Self::Any
        } else {
            Self::SameHostOr(
                config
                    .allowed_origins
                    .iter()
                    .map(|o| o.trim_end_matches('/').to_ascii_lowercase())
                    .collect(),
            )
        }
    }

    /// Decide whether a request may upgrade.
    ///
    /// Requests without an `Origin` header come from non-browser clients and
    /// are accepted.
    pub fn allows(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let allowed = match self {
            Self::Any => return true,
            Self::SameHostOr(allowed) => allowed,
        };
        let Some(origin) = origin else {
            return true;
        };
        let origin = origin.trim_end_matches('/').to_ascii_lowercase();
        if allowed.iter().any(|a| *a == origin) {
            return true;
        }
        match (origin_host(&origin), host) {
            (Some(origin_host), Some(host)) => origin_host.eq_ignore_ascii_case(host),
            _ => false,
        }
    }
}

/// Authority part of an origin (`https://example.com:8443` → `example.com:8443`).
fn origin_host(origin: &str) -> Option<&str> {
    let (_, rest) = origin.split_once("://")?;
    let host = rest.split('/').next().unwrap_or(rest);
    (!host.is_empty()).then_some(host)
}

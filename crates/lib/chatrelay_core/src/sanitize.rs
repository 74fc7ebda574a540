//! Input sanitizer — user message cleanup and destination URL validation.

use tracing::debug;
use url::Url;

/// Maximum length of a user message, in Unicode scalar values.
pub const MAX_MESSAGE_CHARS: usize = 2000;

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Trims surrounding whitespace, then truncates to [`MAX_MESSAGE_CHARS`].
///
/// An empty result is returned as-is; callers decide whether that is an error.
pub fn sanitize_message(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

/// Hostnames accepted as destination URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedHosts {
    /// No allow-list configured. Fails closed when enforced.
    Unconfigured,
    /// Wildcard or explicitly empty allow-list: any host is accepted.
    Any,
    /// Exact hosts or their proper subdomains.
    Only(Vec<String>),
}

impl AllowedHosts {
    /// Parses a comma-separated allow-list value.
    ///
    /// `None` means the setting is absent; `Some("")` and `Some("*")` are the
    /// explicit open policies.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return AllowedHosts::Unconfigured;
        };
        let hosts: Vec<String> = raw
            .split(',')
            .map(|h| h.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() || hosts.iter().any(|h| h == "*") {
            AllowedHosts::Any
        } else {
            AllowedHosts::Only(hosts)
        }
    }
}

/// Domain allow-list, enforced only in production-like deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainAllowList {
    pub enforced: bool,
    pub hosts: AllowedHosts,
}

impl DomainAllowList {
    pub fn unrestricted() -> Self {
        Self {
            enforced: false,
            hosts: AllowedHosts::Any,
        }
    }

    /// Whether `host` may be used as a destination.
    pub fn permits(&self, host: &str) -> bool {
        if !self.enforced {
            return true;
        }
        match &self.hosts {
            AllowedHosts::Unconfigured => false,
            AllowedHosts::Any => true,
            AllowedHosts::Only(allowed) => allowed.iter().any(|domain| host_matches(host, domain)),
        }
    }
}

/// Exact match, or `host` ends with `.` + `domain`. A bare suffix match is
/// not enough: `evil-allowed.com` must not match `allowed.com`.
fn host_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// Destination URL rules: default value plus allow-list.
#[derive(Debug, Clone)]
pub struct DestinationPolicy {
    pub default_url: String,
    pub allow_list: DomainAllowList,
}

impl DestinationPolicy {
    /// Validates a caller-supplied destination URL.
    ///
    /// Absent or blank input resolves to the default URL. Otherwise returns
    /// `scheme://host/path` with query and fragment removed, or `None` when the
    /// URL does not parse, uses a scheme other than http(s), or names a host
    /// outside the allow-list.
    pub fn validate(&self, raw: Option<&str>) -> Option<String> {
        let raw = match raw.map(str::trim) {
            None | Some("") => return Some(self.default_url.clone()),
            Some(raw) => raw,
        };

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "destination URL does not parse");
                return None;
            }
        };
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            debug!(scheme = url.scheme(), "destination URL scheme rejected");
            return None;
        }
        let host = url.host_str()?.trim_end_matches('.');
        if !self.allow_list.permits(host) {
            debug!(host, "destination host not in allow-list");
            return None;
        }

        Some(format!("{}://{}{}", url.scheme(), host, url.path()))
    }
}

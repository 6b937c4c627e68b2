//! URL filter: extraction plus allow-list/scheme/CIDR/path validation.

use crate::context::GuardrailContext;
use crate::registry::{self, CheckDefinition, CheckFn, Engine};
use crate::types::GuardrailResult;
use crate::Result;
use ipnet::IpNet;
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct UrlsConfig {
    /// Hosts, CIDR ranges, or host/path prefixes that are permitted.
    #[serde(default)]
    pub url_allow_list: Vec<String>,
    /// Permitted URL schemes. Schemeless URLs are treated as https.
    #[serde(default = "default_schemes")]
    pub allowed_schemes: Vec<String>,
    /// Whether subdomains of an allow-list host are also permitted.
    #[serde(default)]
    pub allow_subdomains: bool,
    /// Trip the wire when any URL falls outside the allow list.
    #[serde(default = "default_true")]
    pub block: bool,
}

fn default_schemes() -> Vec<String> {
    vec!["https".to_string()]
}

fn default_true() -> bool {
    true
}

// Full URLs with a scheme, www-prefixed hosts, and bare domains.
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        \b(?:
            [a-z][a-z0-9+.-]*://[^\s<>"'\)\]]+
          | www\.[^\s<>"'\)\]]+
          | [a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+(?::\d+)?(?:/[^\s<>"'\)\]]*)?
        )"#,
    )
    .expect("static URL pattern compiles")
});

pub async fn urls_check(
    _ctx: &GuardrailContext,
    input: &str,
    config: Value,
) -> Result<GuardrailResult> {
    let config: UrlsConfig = registry::typed_config("urls", &config)?;

    let mut allowed = Vec::new();
    let mut blocked = Vec::new();

    for candidate in URL_PATTERN.find_iter(input) {
        let raw = candidate.as_str().trim_end_matches(['.', ',', ';', '!', '?']);
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{}", raw)
        };
        let Ok(url) = Url::parse(&with_scheme) else {
            continue;
        };
        if url.host_str().is_none() {
            continue;
        }

        if is_url_allowed(&url, &config) {
            allowed.push(raw.to_string());
        } else {
            blocked.push(raw.to_string());
        }
    }

    let tripwire = config.block && !blocked.is_empty();
    Ok(GuardrailResult::new(tripwire, input)
        .with_info("allowed", json!(allowed))
        .with_info("blocked", json!(blocked)))
}

fn is_url_allowed(url: &Url, config: &UrlsConfig) -> bool {
    let scheme_ok = config
        .allowed_schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(url.scheme()));
    if !scheme_ok {
        return false;
    }

    let host = match url.host_str() {
        Some(h) => h.to_lowercase(),
        None => return false,
    };

    config
        .url_allow_list
        .iter()
        .any(|entry| entry_matches(&host, url, entry, config.allow_subdomains))
}

/// Match one allow-list entry against a URL.
///
/// Entries may be a bare host ("example.com"), a host with a path prefix
/// ("example.com/docs"), or a CIDR range ("10.0.0.0/8"). An explicit default
/// port on either side is equivalent to no port, which `Url` normalizes away
/// at parse time.
fn entry_matches(host: &str, url: &Url, entry: &str, allow_subdomains: bool) -> bool {
    let entry = entry.trim().to_lowercase();
    let entry = entry
        .strip_prefix("https://")
        .or_else(|| entry.strip_prefix("http://"))
        .unwrap_or(&entry);

    if let Ok(net) = entry.parse::<IpNet>() {
        return match host.parse::<IpAddr>() {
            Ok(ip) => net.contains(&ip),
            Err(_) => false,
        };
    }

    let (entry_host, path_prefix) = match entry.split_once('/') {
        Some((h, p)) => (h, Some(format!("/{}", p))),
        None => (entry, None),
    };
    // Ports in entries follow the same default-port equivalence as URLs.
    let entry_host = entry_host
        .strip_suffix(":443")
        .or_else(|| entry_host.strip_suffix(":80"))
        .unwrap_or(entry_host);

    if let (Ok(entry_ip), Ok(host_ip)) = (entry_host.parse::<IpAddr>(), host.parse::<IpAddr>()) {
        if entry_ip != host_ip {
            return false;
        }
    } else {
        let host_ok =
            host == entry_host || (allow_subdomains && host.ends_with(&format!(".{}", entry_host)));
        if !host_ok {
            return false;
        }
    }

    match path_prefix {
        Some(prefix) if prefix != "/" => url.path().starts_with(&prefix),
        _ => true,
    }
}

pub fn definition() -> CheckDefinition {
    let check: CheckFn = Arc::new(|ctx, input, config| Box::pin(urls_check(ctx, input, config)));
    CheckDefinition::builder("urls", check)
        .description("Extracts URLs and validates them against scheme and allow-list rules")
        .config_schema(registry::schema_for::<UrlsConfig>())
        .engine(Engine::Regex)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(text: &str, config: Value) -> GuardrailResult {
        let ctx = GuardrailContext::new();
        urls_check(&ctx, text, config).await.unwrap()
    }

    #[tokio::test]
    async fn explicit_default_port_is_equivalent_to_no_port() {
        let result = run(
            "https://example.com:443",
            json!({"url_allow_list": ["example.com"], "allowed_schemes": ["https"]}),
        )
        .await;
        assert_eq!(result.info["allowed"], json!(["https://example.com:443"]));
        assert!(!result.tripwire_triggered);
    }

    #[tokio::test]
    async fn unlisted_host_is_blocked() {
        let result = run(
            "see https://evil.example.net/path",
            json!({"url_allow_list": ["example.com"]}),
        )
        .await;
        assert_eq!(result.info["blocked"], json!(["https://evil.example.net/path"]));
        assert!(result.tripwire_triggered);
    }

    #[tokio::test]
    async fn disallowed_scheme_is_blocked() {
        let result = run(
            "http://example.com",
            json!({"url_allow_list": ["example.com"], "allowed_schemes": ["https"]}),
        )
        .await;
        assert!(result.tripwire_triggered);
    }

    #[tokio::test]
    async fn subdomains_only_when_enabled() {
        let config = json!({"url_allow_list": ["example.com"]});
        let result = run("https://api.example.com", config).await;
        assert!(result.tripwire_triggered);

        let config = json!({"url_allow_list": ["example.com"], "allow_subdomains": true});
        let result = run("https://api.example.com", config).await;
        assert!(!result.tripwire_triggered);
    }

    #[tokio::test]
    async fn cidr_entries_match_ip_hosts() {
        let config = json!({"url_allow_list": ["10.0.0.0/8"], "allowed_schemes": ["https"]});
        let result = run("https://10.1.2.3/admin", config.clone()).await;
        assert!(!result.tripwire_triggered);

        let result = run("https://192.168.0.1/admin", config).await;
        assert!(result.tripwire_triggered);
    }

    #[tokio::test]
    async fn path_prefix_entries_constrain_paths() {
        let config = json!({"url_allow_list": ["example.com/docs"]});
        let result = run("https://example.com/docs/intro", config.clone()).await;
        assert!(!result.tripwire_triggered);

        let result = run("https://example.com/admin", config).await;
        assert!(result.tripwire_triggered);
    }

    #[tokio::test]
    async fn bare_domains_get_default_scheme() {
        let result = run(
            "visit example.com today",
            json!({"url_allow_list": ["example.com"]}),
        )
        .await;
        assert!(!result.tripwire_triggered);
        assert_eq!(result.info["allowed"], json!(["example.com"]));
    }

    #[tokio::test]
    async fn no_urls_means_no_tripwire() {
        let result = run("no links here", json!({"url_allow_list": []})).await;
        assert!(!result.tripwire_triggered);
        assert_eq!(result.info["blocked"], json!([]));
    }
}

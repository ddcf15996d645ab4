use keepsync_core::config::{GoogleConfig, NetworkConfig};
use reqwest::{Client, Proxy};
use std::time::Duration;
use tracing::{info, warn};

enum ProxyResolution {
    UseProxy(String),
    /// `proxy = ""` or a host listed in `noProxy`. Also ignores proxy env vars.
    ForceDirectConnect,
    /// Nothing configured. reqwest reads HTTPS_PROXY / HTTP_PROXY itself.
    None,
}

/// Matches exact hosts, `*.example.com` (subdomains only) and
/// `.example.com` (the domain and its subdomains).
fn is_no_proxy(host: &str, no_proxy_list: &[String]) -> bool {
    let host_lower = host.to_lowercase();
    for rule in no_proxy_list {
        let r = rule.trim().to_lowercase();
        if r.is_empty() {
            continue;
        }
        if let Some(suffix) = r.strip_prefix("*.") {
            if host_lower.ends_with(&format!(".{}", suffix)) {
                return true;
            }
        } else if let Some(suffix) = r.strip_prefix('.') {
            if host_lower == suffix || host_lower.ends_with(&format!(".{}", suffix)) {
                return true;
            }
        } else if host_lower == r {
            return true;
        }
    }
    false
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    };
    let host = without_scheme.split('/').next()?.split('@').last()?;
    let host = if host.starts_with('[') {
        host.split(']').next().map(|s| s.trim_start_matches('['))?.to_string()
    } else {
        host.split(':').next()?.to_string()
    };
    Some(host)
}

fn resolve_proxy(proxy: Option<&str>, no_proxy: &[String], target: &str) -> ProxyResolution {
    match proxy {
        Some("") => ProxyResolution::ForceDirectConnect,
        Some(p) => {
            if let Some(host) = extract_host(target) {
                if is_no_proxy(&host, no_proxy) {
                    return ProxyResolution::ForceDirectConnect;
                }
            }
            ProxyResolution::UseProxy(p.to_string())
        }
        None => ProxyResolution::None,
    }
}

/// HTTP client for requests to `target`, honouring the configured proxy.
pub fn build_http_client(
    proxy: Option<&str>,
    no_proxy: &[String],
    target: &str,
    timeout: Duration,
) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(proxy, no_proxy, target) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, target = %target, "Google client using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!(target = %target, "Google client forced to direct connect");
            builder = builder.no_proxy();
        }
        ProxyResolution::None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}

/// Client for the Android auth endpoint and the notes changes API.
#[derive(Clone)]
pub struct GoogleClient {
    pub(crate) http: Client,
    pub(crate) config: GoogleConfig,
}

impl GoogleClient {
    pub fn new(config: GoogleConfig, network: &NetworkConfig) -> Self {
        let http = build_http_client(
            network.proxy.as_deref(),
            &network.no_proxy,
            &config.auth_url,
            Duration::from_secs(config.timeout_secs),
        );
        Self { http, config }
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }
}

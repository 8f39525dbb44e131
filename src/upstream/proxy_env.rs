//! Proxy selection from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`.
//!
//! # Design Decisions
//! - Read once when the transport is built, never per request
//! - Uppercase variables win over lowercase ones
//! - `localhost` and loopback addresses are never proxied
//! - `NO_PROXY` supports `*`, domains (`example.com` matches subdomains,
//!   `.example.com` only subdomains), IP literals and `host:port` entries

use std::net::IpAddr;

use url::Url;

/// A forward proxy reachable over plain TCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    fn parse(raw: &str) -> Option<Self> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = match Url::parse(&with_scheme) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(proxy = raw, error = %e, "Ignoring unparsable proxy URL");
                return None;
            }
        };
        if url.scheme() != "http" {
            tracing::warn!(proxy = raw, scheme = url.scheme(), "Only http:// proxies are supported");
            return None;
        }
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        Some(Self { host, port })
    }

    /// `host:port` to dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxyRule {
    All,
    Domain { name: String, subdomains_only: bool, port: Option<u16> },
    Ip { ip: IpAddr, port: Option<u16> },
}

impl NoProxyRule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(Self::All);
        }
        if let Ok(ip) = strip_brackets(&entry).parse::<IpAddr>() {
            return Some(Self::Ip { ip, port: None });
        }
        let (name, port) = match entry.rsplit_once(':') {
            Some((name, port)) => match port.parse::<u16>() {
                Ok(port) => (name.to_string(), Some(port)),
                Err(_) => (entry.clone(), None),
            },
            None => (entry.clone(), None),
        };
        if let Ok(ip) = strip_brackets(&name).parse::<IpAddr>() {
            return Some(Self::Ip { ip, port });
        }
        match name.strip_prefix('.') {
            Some(rest) => Some(Self::Domain { name: rest.to_string(), subdomains_only: true, port }),
            None => Some(Self::Domain { name, subdomains_only: false, port }),
        }
    }

    fn matches(&self, host: &str, ip: Option<IpAddr>, port: u16) -> bool {
        match self {
            Self::All => true,
            Self::Ip { ip: rule_ip, port: rule_port } => {
                ip == Some(*rule_ip) && rule_port.map_or(true, |p| p == port)
            }
            Self::Domain { name, subdomains_only, port: rule_port } => {
                if rule_port.is_some_and(|p| p != port) {
                    return false;
                }
                let is_subdomain = host
                    .strip_suffix(name.as_str())
                    .is_some_and(|rest| rest.ends_with('.'));
                is_subdomain || (!subdomains_only && host == name)
            }
        }
    }
}

/// Proxy configuration captured from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    http: Option<ProxyEndpoint>,
    https: Option<ProxyEndpoint>,
    no_proxy: Vec<NoProxyRule>,
}

impl ProxyEnv {
    /// Read the standard proxy variables of this process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            http: get("HTTP_PROXY", "http_proxy").and_then(|v| ProxyEndpoint::parse(&v)),
            https: get("HTTPS_PROXY", "https_proxy").and_then(|v| ProxyEndpoint::parse(&v)),
            no_proxy: get("NO_PROXY", "no_proxy")
                .map(|v| v.split(',').filter_map(NoProxyRule::parse).collect())
                .unwrap_or_default(),
        }
    }

    /// No proxying at all.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn is_direct(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    /// The proxy to use for a target, if any.
    pub fn proxy_for(&self, https: bool, host: &str, port: u16) -> Option<&ProxyEndpoint> {
        let proxy = if https { self.https.as_ref() } else { self.http.as_ref() }?;

        let host = strip_brackets(host).to_ascii_lowercase();
        let ip = host.parse::<IpAddr>().ok();
        if host == "localhost" || host.ends_with(".localhost") || ip.is_some_and(|ip| ip.is_loopback()) {
            return None;
        }
        if self.no_proxy.iter().any(|rule| rule.matches(&host, ip, port)) {
            return None;
        }
        Some(proxy)
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> ProxyEnv {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProxyEnv::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn empty_environment_is_direct() {
        let env = env(&[]);
        assert!(env.is_direct());
        assert!(env.proxy_for(false, "app.default.svc", 80).is_none());
    }

    #[test]
    fn scheme_selects_proxy() {
        let env = env(&[
            ("HTTP_PROXY", "http://plain-proxy:3128"),
            ("https_proxy", "tls-proxy"),
        ]);
        assert_eq!(env.proxy_for(false, "example.com", 80).unwrap().address(), "plain-proxy:3128");
        assert_eq!(env.proxy_for(true, "example.com", 443).unwrap().address(), "tls-proxy:80");
    }

    #[test]
    fn uppercase_wins() {
        let env = env(&[("HTTP_PROXY", "upper:1"), ("http_proxy", "lower:2")]);
        assert_eq!(env.proxy_for(false, "example.com", 80).unwrap().address(), "upper:1");
    }

    #[test]
    fn loopback_is_never_proxied() {
        let env = env(&[("HTTP_PROXY", "proxy:3128")]);
        assert!(env.proxy_for(false, "localhost", 80).is_none());
        assert!(env.proxy_for(false, "127.0.0.1", 80).is_none());
        assert!(env.proxy_for(false, "[::1]", 80).is_none());
    }

    #[test]
    fn no_proxy_rules() {
        let env = env(&[
            ("HTTP_PROXY", "proxy:3128"),
            ("NO_PROXY", "svc.cluster.local, .internal,10.0.0.7,api.example.com:8080"),
        ]);
        assert!(env.proxy_for(false, "svc.cluster.local", 80).is_none());
        assert!(env.proxy_for(false, "app.ns.svc.cluster.local", 80).is_none());
        assert!(env.proxy_for(false, "db.internal", 80).is_none());
        assert!(env.proxy_for(false, "internal", 80).is_some());
        assert!(env.proxy_for(false, "10.0.0.7", 80).is_none());
        assert!(env.proxy_for(false, "api.example.com", 8080).is_none());
        assert!(env.proxy_for(false, "api.example.com", 80).is_some());
        assert!(env.proxy_for(false, "notsvc.cluster.local.evil.com", 80).is_some());
    }

    #[test]
    fn wildcard_disables_proxy() {
        let env = env(&[("HTTP_PROXY", "proxy:3128"), ("no_proxy", "*")]);
        assert!(env.proxy_for(false, "example.com", 80).is_none());
    }

    #[test]
    fn unsupported_proxy_scheme_is_ignored() {
        let env = env(&[("HTTPS_PROXY", "socks5://proxy:1080")]);
        assert!(env.is_direct());
    }
}

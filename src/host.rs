//! Host identity resolution
//!
//! Clusters expose many numbered login and batch front-end nodes. They all
//! belong to one machine, so their prefix is stripped before taking the
//! first label as the short host name.

use regex::Regex;
use tracing::debug;

lazy_static::lazy_static! {
    static ref LOGIN_PREFIX: Regex = Regex::new(r"^login[0-9]*\.").unwrap();
    static ref BATCH_PREFIX: Regex = Regex::new(r"^batch[0-9]*\.").unwrap();
}

/// Long (network) and short (canonical) identity of a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub short_name: String,
    pub long_name: String,
}

impl HostIdentity {
    /// Canonicalize a fully-qualified host name
    pub fn from_fqdn(fqdn: &str) -> Self {
        let mut host = fqdn.to_string();
        if host.starts_with("login") {
            host = LOGIN_PREFIX.replace(&host, "").into_owned();
        }
        if host.starts_with("batch") {
            host = BATCH_PREFIX.replace(&host, "").into_owned();
        }
        let short_name = host.split('.').next().unwrap_or_default().to_string();
        Self {
            short_name,
            long_name: host,
        }
    }

    /// Identity of the machine we are running on, with an optional
    /// explicit short name taking precedence over resolution
    pub fn current(override_name: Option<&str>) -> Self {
        let node = gethostname::gethostname().to_string_lossy().into_owned();
        let fqdn = qualify(&node, canonical_name);
        let mut identity = Self::from_fqdn(&fqdn);
        if let Some(name) = override_name {
            identity.short_name = name.to_string();
        }
        debug!("Host identity: {} ({})", identity.short_name, identity.long_name);
        identity
    }
}

/// Fully-qualified form of a node name. A dotted node name is used as is.
/// Otherwise the resolver's canonical name is taken when it is dotted, and
/// the bare node name when it is not.
fn qualify<F>(node: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if node.contains('.') {
        return node.to_string();
    }
    match resolve(node) {
        Some(name) if name.contains('.') => name,
        _ => node.to_string(),
    }
}

/// Canonical name of `node` from the system resolver
#[cfg(unix)]
fn canonical_name(node: &str) -> Option<String> {
    use dns_lookup::{getaddrinfo, AddrInfoHints};

    let hints = AddrInfoHints {
        flags: libc::AI_CANONNAME,
        ..AddrInfoHints::default()
    };
    match getaddrinfo(Some(node), None, Some(hints)) {
        Ok(mut infos) => infos.find_map(|info| info.ok().and_then(|info| info.canonname)),
        Err(e) => {
            debug!("Cannot resolve host name {}: {:?}", node, e);
            None
        }
    }
}

#[cfg(not(unix))]
fn canonical_name(_node: &str) -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_prefix_is_stripped() {
        let id = HostIdentity::from_fqdn("login3.clusterA.example.com");
        assert_eq!(id.short_name, "clusterA");
        assert_eq!(id.long_name, "clusterA.example.com");
    }

    #[test]
    fn test_batch_prefix_is_stripped() {
        assert_eq!(HostIdentity::from_fqdn("batch12.x.y").short_name, "x");
        assert_eq!(HostIdentity::from_fqdn("batch.x.y").short_name, "x");
    }

    #[test]
    fn test_plain_host() {
        assert_eq!(HostIdentity::from_fqdn("nodeA.example.com").short_name, "nodeA");
        assert_eq!(HostIdentity::from_fqdn("laptop").short_name, "laptop");
    }

    #[test]
    fn test_prefix_needs_digits_then_dot() {
        // "loginnode" is a real host name, not a login prefix
        assert_eq!(HostIdentity::from_fqdn("loginnode.site.org").short_name, "loginnode");
        assert_eq!(HostIdentity::from_fqdn("login").short_name, "login");
    }

    #[test]
    fn test_short_node_name_is_qualified() {
        let resolver = |node: &str| Some(format!("{}.clusterA.example.com", node));
        let fqdn = qualify("login3", resolver);
        assert_eq!(fqdn, "login3.clusterA.example.com");
        assert_eq!(HostIdentity::from_fqdn(&fqdn).short_name, "clusterA");
        assert_eq!(
            HostIdentity::from_fqdn(&qualify("login7", resolver)).short_name,
            "clusterA"
        );
    }

    #[test]
    fn test_dotted_node_name_skips_resolver() {
        let fqdn = qualify("login3.clusterA.example.com", |_: &str| -> Option<String> {
            panic!("resolver must not be called")
        });
        assert_eq!(fqdn, "login3.clusterA.example.com");
    }

    #[test]
    fn test_unresolvable_node_name_is_kept() {
        assert_eq!(qualify("laptop", |_: &str| None), "laptop");
        assert_eq!(qualify("laptop", |_: &str| Some("laptop".to_string())), "laptop");
    }

    #[test]
    fn test_override_is_verbatim() {
        let id = HostIdentity::current(Some("My.Cluster"));
        assert_eq!(id.short_name, "My.Cluster");
    }
}

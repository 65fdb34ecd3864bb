//! Keys identifying source objects and their downstream resources

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid object key {0:?}, expected namespace/name")]
pub struct InvalidKey(pub String);

/// Transport protocol a downstream resource is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `namespace/name` of a source object in the local cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub namespace: String,
    pub name: String,
}

impl SourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for SourceKey {
    type Err = InvalidKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(SourceKey::new(namespace, name))
            }
            _ => Err(InvalidKey(s.to_string())),
        }
    }
}

/// Name of a downstream resource on the load balancer API
///
/// Joins cluster, namespace, name and protocol, e.g. `nird-ns9999k-mysql-tcp`.
/// The same inputs always produce the same name, which is what makes repeated
/// reconciles of one object address the same remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub protocol: Protocol,
}

impl ServiceKey {
    pub fn new(cluster: &str, source: &SourceKey, protocol: Protocol) -> Self {
        Self {
            cluster: cluster.to_string(),
            namespace: source.namespace.clone(),
            name: source.name.clone(),
            protocol,
        }
    }

    /// Keys for every protocol, used when the last protocol is unknown
    pub fn all(cluster: &str, source: &SourceKey) -> [ServiceKey; 2] {
        Protocol::ALL.map(|p| ServiceKey::new(cluster, source, p))
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.cluster, self.namespace, self.name, self.protocol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_key_format() {
        let source = SourceKey::new("ns9999k", "mysql");
        let key = ServiceKey::new("nird", &source, Protocol::Tcp);
        assert_eq!(key.to_string(), "nird-ns9999k-mysql-tcp");
    }

    #[test]
    fn test_service_key_is_deterministic() {
        let source = SourceKey::new("default", "web");
        let a = ServiceKey::new("nird", &source, Protocol::Udp).to_string();
        let b = ServiceKey::new("nird", &source, Protocol::Udp).to_string();
        assert_eq!(a, b);
    }

    #[test]
    fn test_service_key_changes_with_each_component() {
        let base = ServiceKey::new("nird", &SourceKey::new("default", "web"), Protocol::Tcp);
        let variants = [
            ServiceKey::new("other", &SourceKey::new("default", "web"), Protocol::Tcp),
            ServiceKey::new("nird", &SourceKey::new("prod", "web"), Protocol::Tcp),
            ServiceKey::new("nird", &SourceKey::new("default", "api"), Protocol::Tcp),
            ServiceKey::new("nird", &SourceKey::new("default", "web"), Protocol::Udp),
        ];

        for variant in variants {
            assert_ne!(variant, base);
            assert_ne!(variant.to_string(), base.to_string());
        }
    }

    #[test]
    fn test_all_yields_tcp_and_udp() {
        let keys = ServiceKey::all("nird", &SourceKey::new("default", "web"));
        assert_eq!(keys[0].to_string(), "nird-default-web-tcp");
        assert_eq!(keys[1].to_string(), "nird-default-web-udp");
    }

    #[test]
    fn test_source_key_parse() {
        let key: SourceKey = "default/web".parse().unwrap();
        assert_eq!(key, SourceKey::new("default", "web"));
        assert_eq!(key.to_string(), "default/web");

        assert!("web".parse::<SourceKey>().is_err());
        assert!("/web".parse::<SourceKey>().is_err());
        assert!("default/".parse::<SourceKey>().is_err());
        assert!("a/b/c".parse::<SourceKey>().is_err());
    }
}

//! Load balancer API resources and their wire codec
//!
//! Every object exchanged with the API travels in one envelope:
//!
//! ```json
//! {
//!   "type": "tcp",
//!   "metadata": { "name": "nird-default-web-tcp" },
//!   "config": { "method": "least_conn", "ports": { "80": 30080 } }
//! }
//! ```
//!
//! The shape of `config` depends on `type`. Decoding reads the envelope with
//! the config still opaque, then dispatches exactly once on the tag. Encoding
//! is the inverse: the concrete config reports its own tag and is inlined into
//! the envelope as a JSON object.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Tag carried by every frontend envelope
pub const FRONTEND_TYPE: &str = "frontend";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized service type: {0:?}")]
    UnrecognizedType(String),
    #[error("unsupported service type: {0}")]
    UnsupportedType(ServiceType),
    #[error("invalid {service_type} config: {source}")]
    InvalidConfig {
        service_type: ServiceType,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected a frontend object, got type {0:?}")]
    NotAFrontend(String),
}

/// Kind of service offered by the load balancers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Tcp,
    TcpProxyProtocol,
    Udp,
    #[serde(alias = "shared-http")]
    SharedHttp,
    /// Known to the API but not handled by this client
    Mediasite,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Tcp => "tcp",
            ServiceType::TcpProxyProtocol => "tcp_proxy_protocol",
            ServiceType::Udp => "udp",
            ServiceType::SharedHttp => "shared_http",
            ServiceType::Mediasite => "mediasite",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(ServiceType::Tcp),
            "tcp_proxy_protocol" => Ok(ServiceType::TcpProxyProtocol),
            "udp" => Ok(ServiceType::Udp),
            "shared_http" | "shared-http" => Ok(ServiceType::SharedHttp),
            "mediasite" => Ok(ServiceType::Mediasite),
            other => Err(CodecError::UnrecognizedType(other.to_string())),
        }
    }
}

/// Metadata of API objects. Only `name` is supplied by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A backend host and the addresses traffic is forwarded to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addrs: Vec<IpAddr>,
}

/// Health check for L4 services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpHealthCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub send: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expect: String,
}

impl TcpHealthCheck {
    fn is_unset(&self) -> bool {
        self == &Self::default()
    }
}

/// Configuration of an L4 (`tcp`, `tcp_proxy_protocol`, `udp`) service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    /// Published port (stringified) to allocated node port
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, i32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
    #[serde(skip_serializing_if = "is_zero")]
    pub upstream_max_conns: u32,
    /// Allowed source CIDRs, empty means unrestricted
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub acl: Vec<String>,
    #[serde(skip_serializing_if = "TcpHealthCheck::is_unset")]
    pub health_check: TcpHealthCheck,
    /// Name of a [`Frontend`] holding the virtual addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpHealthCheck {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl HttpHealthCheck {
    fn is_unset(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendProtocols {
    Http,
    Https,
    Both,
}

/// Plain HTTP side of a shared HTTP service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub redirect_https: bool,
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub backend_port: u16,
    #[serde(skip_serializing_if = "HttpHealthCheck::is_unset")]
    pub health_check: HttpHealthCheck,
}

/// TLS side of a shared HTTP service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsSection {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate: String,
    #[serde(skip_serializing_if = "is_zero_u16")]
    pub backend_port: u16,
    #[serde(skip_serializing_if = "HttpHealthCheck::is_unset")]
    pub health_check: HttpHealthCheck,
}

/// Configuration of a `shared_http` service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedHttpConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    pub sticky_backends: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_protocols: Option<BackendProtocols>,
    pub http: HttpSection,
    pub https: HttpsSection,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
}

/// Concrete service configuration, one case per supported [`ServiceType`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceConfig {
    Tcp(TcpConfig),
    TcpProxyProtocol(TcpConfig),
    Udp(TcpConfig),
    SharedHttp(SharedHttpConfig),
}

impl ServiceConfig {
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceConfig::Tcp(_) => ServiceType::Tcp,
            ServiceConfig::TcpProxyProtocol(_) => ServiceType::TcpProxyProtocol,
            ServiceConfig::Udp(_) => ServiceType::Udp,
            ServiceConfig::SharedHttp(_) => ServiceType::SharedHttp,
        }
    }

    /// The L4 config, if this is one of the TCP-shaped variants
    pub fn as_l4(&self) -> Option<&TcpConfig> {
        match self {
            ServiceConfig::Tcp(c) | ServiceConfig::TcpProxyProtocol(c) | ServiceConfig::Udp(c) => {
                Some(c)
            }
            ServiceConfig::SharedHttp(_) => None,
        }
    }

    fn decode(service_type: ServiceType, raw: Value) -> Result<Self, CodecError> {
        match service_type {
            ServiceType::Tcp => decode_config(service_type, raw).map(ServiceConfig::Tcp),
            ServiceType::TcpProxyProtocol => {
                decode_config(service_type, raw).map(ServiceConfig::TcpProxyProtocol)
            }
            ServiceType::Udp => decode_config(service_type, raw).map(ServiceConfig::Udp),
            ServiceType::SharedHttp => {
                decode_config(service_type, raw).map(ServiceConfig::SharedHttp)
            }
            ServiceType::Mediasite => Err(CodecError::UnsupportedType(service_type)),
        }
    }
}

fn decode_config<T: DeserializeOwned>(
    service_type: ServiceType,
    raw: Value,
) -> Result<T, CodecError> {
    serde_json::from_value(raw).map_err(|source| CodecError::InvalidConfig {
        service_type,
        source,
    })
}

/// Externally reachable address assigned by the load balancers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Service handled by the load balancers
///
/// The type tag is derived from [`ServiceConfig`], so a config can never
/// disagree with its tag.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ServiceEnvelope")]
pub struct Service {
    pub metadata: Metadata,
    pub config: ServiceConfig,
    pub ingress: Vec<Ingress>,
}

impl Service {
    pub fn new(name: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            metadata: Metadata::named(name),
            config,
            ingress: Vec::new(),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.config.service_type()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Deserialize)]
struct ServiceEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    ingress: Vec<Ingress>,
}

impl TryFrom<ServiceEnvelope> for Service {
    type Error = CodecError;

    fn try_from(envelope: ServiceEnvelope) -> Result<Self, Self::Error> {
        let service_type: ServiceType = envelope.kind.parse()?;
        let raw = envelope
            .config
            .unwrap_or_else(|| Value::Object(Default::default()));

        Ok(Service {
            metadata: envelope.metadata,
            config: ServiceConfig::decode(service_type, raw)?,
            ingress: envelope.ingress,
        })
    }
}

#[derive(Serialize)]
struct ServiceEnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: ServiceType,
    metadata: &'a Metadata,
    config: ConfigRef<'a>,
    #[serde(skip_serializing_if = "is_empty_slice")]
    ingress: &'a [Ingress],
}

#[derive(Serialize)]
#[serde(untagged)]
enum ConfigRef<'a> {
    L4(&'a TcpConfig),
    SharedHttp(&'a SharedHttpConfig),
}

impl Serialize for Service {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let config = match &self.config {
            ServiceConfig::Tcp(c) | ServiceConfig::TcpProxyProtocol(c) | ServiceConfig::Udp(c) => {
                ConfigRef::L4(c)
            }
            ServiceConfig::SharedHttp(c) => ConfigRef::SharedHttp(c),
        };

        ServiceEnvelopeRef {
            kind: self.service_type(),
            metadata: &self.metadata,
            config,
            ingress: &self.ingress,
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<IpAddr>,
}

/// Pool of virtual addresses a [`Service`] can reference by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "FrontendEnvelope")]
pub struct Frontend {
    pub metadata: Metadata,
    pub config: FrontendConfig,
}

impl Frontend {
    pub fn new(name: impl Into<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            metadata: Metadata::named(name),
            config: FrontendConfig { addresses },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Deserialize)]
struct FrontendEnvelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    config: FrontendConfig,
}

impl TryFrom<FrontendEnvelope> for Frontend {
    type Error = CodecError;

    fn try_from(envelope: FrontendEnvelope) -> Result<Self, Self::Error> {
        if envelope.kind != FRONTEND_TYPE {
            return Err(CodecError::NotAFrontend(envelope.kind));
        }
        Ok(Frontend {
            metadata: envelope.metadata,
            config: envelope.config,
        })
    }
}

#[derive(Serialize)]
struct FrontendEnvelopeRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    metadata: &'a Metadata,
    config: &'a FrontendConfig,
}

impl Serialize for Frontend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        FrontendEnvelopeRef {
            kind: FRONTEND_TYPE,
            metadata: &self.metadata,
            config: &self.config,
        }
        .serialize(serializer)
    }
}

/// Decode a single service envelope
pub fn decode_service(bytes: &[u8]) -> Result<Service, CodecError> {
    let envelope: ServiceEnvelope = serde_json::from_slice(bytes)?;
    Service::try_from(envelope)
}

/// Decode a service listing, either a JSON array or back-to-back documents
pub fn decode_services(bytes: &[u8]) -> Result<Vec<Service>, CodecError> {
    decode_many::<ServiceEnvelope>(bytes)?
        .into_iter()
        .map(Service::try_from)
        .collect()
}

pub fn decode_frontend(bytes: &[u8]) -> Result<Frontend, CodecError> {
    let envelope: FrontendEnvelope = serde_json::from_slice(bytes)?;
    Frontend::try_from(envelope)
}

pub fn decode_frontends(bytes: &[u8]) -> Result<Vec<Frontend>, CodecError> {
    decode_many::<FrontendEnvelope>(bytes)?
        .into_iter()
        .map(Frontend::try_from)
        .collect()
}

pub fn decode_ingress(bytes: &[u8]) -> Result<Vec<Ingress>, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn decode_metadata(bytes: &[u8]) -> Result<Metadata, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Compact encoding used on the wire
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Human readable encoding with a two space indent
pub fn encode_pretty<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn decode_many<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, serde_json::Error> {
    let trimmed = bytes.trim_ascii_start();
    if trimmed.first() == Some(&b'[') {
        return serde_json::from_slice(trimmed);
    }
    serde_json::Deserializer::from_slice(trimmed)
        .into_iter::<T>()
        .collect()
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}

fn is_empty_slice<T>(s: &&[T]) -> bool {
    s.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_SERVICE_JSON: &str = r#"{
  "type": "tcp",
  "metadata": {
    "name": "testservice"
  },
  "config": {
    "method": "least_conn",
    "ports": {
      "443": 30443,
      "80": 30080
    },
    "backends": [
      {
        "host": "hostname1.example.com",
        "addrs": [
          "10.3.2.43",
          "2001:700:f00d::8"
        ]
      },
      {
        "host": "hostname2.example.com",
        "addrs": [
          "10.3.2.53",
          "2001:700:f00d::18"
        ]
      }
    ],
    "upstream_max_conns": 100,
    "acl": [
      "10.10.20.0/24",
      "2001:700:1337::/48"
    ],
    "health_check": {
      "port": 1337,
      "send": "healthz\n",
      "expect": "^OK$"
    },
    "frontend": "foobar"
  }
}"#;

    const SHARED_HTTP_SERVICE_JSON: &str = r#"{
  "type": "shared_http",
  "metadata": {
    "name": "testservice"
  },
  "config": {
    "names": [
      "site-a.example.com",
      "site-b.foo.org"
    ],
    "sticky_backends": false,
    "backend_protocols": "both",
    "http": {
      "redirect_https": true,
      "backend_port": 8080,
      "health_check": {
        "uri": "/",
        "status_code": 301
      }
    },
    "https": {
      "private_key": "5aNv4UxBlpIQIRsYKplIWWd+D",
      "certificate": "Df0tz2wBszL9sJYhPjOIAjk+a",
      "backend_port": 8888,
      "health_check": {
        "uri": "/healthz",
        "status_code": 200,
        "body": "OK"
      }
    },
    "backends": [
      {
        "host": "hostname1.example.com",
        "addrs": [
          "10.3.2.43",
          "2001:700:f00d::8"
        ]
      }
    ]
  }
}"#;

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("test IP should parse")
    }

    fn tcp_service() -> Service {
        Service::new(
            "testservice",
            ServiceConfig::Tcp(TcpConfig {
                method: "least_conn".to_string(),
                ports: BTreeMap::from([("80".to_string(), 30080), ("443".to_string(), 30443)]),
                backends: vec![
                    Backend {
                        host: "hostname1.example.com".to_string(),
                        addrs: vec![ip("10.3.2.43"), ip("2001:700:f00d::8")],
                    },
                    Backend {
                        host: "hostname2.example.com".to_string(),
                        addrs: vec![ip("10.3.2.53"), ip("2001:700:f00d::18")],
                    },
                ],
                upstream_max_conns: 100,
                acl: vec!["10.10.20.0/24".to_string(), "2001:700:1337::/48".to_string()],
                health_check: TcpHealthCheck {
                    port: Some(1337),
                    send: "healthz\n".to_string(),
                    expect: "^OK$".to_string(),
                },
                frontend: Some("foobar".to_string()),
            }),
        )
    }

    fn shared_http_service() -> Service {
        Service::new(
            "testservice",
            ServiceConfig::SharedHttp(SharedHttpConfig {
                names: vec!["site-a.example.com".to_string(), "site-b.foo.org".to_string()],
                sticky_backends: false,
                backend_protocols: Some(BackendProtocols::Both),
                http: HttpSection {
                    redirect_https: true,
                    backend_port: 8080,
                    health_check: HttpHealthCheck {
                        uri: "/".to_string(),
                        status_code: 301,
                        body: String::new(),
                    },
                },
                https: HttpsSection {
                    private_key: "5aNv4UxBlpIQIRsYKplIWWd+D".to_string(),
                    certificate: "Df0tz2wBszL9sJYhPjOIAjk+a".to_string(),
                    backend_port: 8888,
                    health_check: HttpHealthCheck {
                        uri: "/healthz".to_string(),
                        status_code: 200,
                        body: "OK".to_string(),
                    },
                },
                backends: vec![Backend {
                    host: "hostname1.example.com".to_string(),
                    addrs: vec![ip("10.3.2.43"), ip("2001:700:f00d::8")],
                }],
            }),
        )
    }

    #[test]
    fn test_decode_tcp_service() {
        let decoded = decode_service(TCP_SERVICE_JSON.as_bytes()).unwrap();
        assert_eq!(decoded, tcp_service());
        assert_eq!(decoded.service_type(), ServiceType::Tcp);
    }

    #[test]
    fn test_encode_tcp_service_is_stable() {
        let encoded = encode_pretty(&tcp_service()).unwrap();
        assert_eq!(encoded, TCP_SERVICE_JSON);
    }

    #[test]
    fn test_decode_shared_http_service() {
        let decoded = decode_service(SHARED_HTTP_SERVICE_JSON.as_bytes()).unwrap();
        assert_eq!(decoded, shared_http_service());
    }

    #[test]
    fn test_encode_shared_http_service_is_stable() {
        let encoded = encode_pretty(&shared_http_service()).unwrap();
        assert_eq!(encoded, SHARED_HTTP_SERVICE_JSON);
    }

    #[test]
    fn test_roundtrip_every_supported_type() {
        let l4 = tcp_service().config.as_l4().cloned().unwrap();
        let services = vec![
            tcp_service(),
            Service::new("pp", ServiceConfig::TcpProxyProtocol(l4.clone())),
            Service::new("dns", ServiceConfig::Udp(l4)),
            shared_http_service(),
        ];

        for service in services {
            let bytes = encode(&service).unwrap();
            let decoded = decode_service(&bytes).unwrap();
            assert_eq!(decoded, service, "roundtrip of {}", service.service_type());
        }
    }

    #[test]
    fn test_config_is_inlined_not_nested_string() {
        let value: Value = serde_json::from_slice(&encode(&tcp_service()).unwrap()).unwrap();
        assert!(value["config"].is_object());
        assert_eq!(value["config"]["ports"]["80"], 30080);
    }

    #[test]
    fn test_decode_legacy_shared_http_tag() {
        let json = r#"{
            "type": "shared-http",
            "metadata": {"name": "x"},
            "config": {"names": ["a.example.com"]}
        }"#;
        let decoded = decode_service(json.as_bytes()).unwrap();
        assert_eq!(decoded.service_type(), ServiceType::SharedHttp);
        assert!(encode_pretty(&decoded).unwrap().contains("\"shared_http\""));
    }

    #[test]
    fn test_decode_mediasite_is_unsupported() {
        let json = r#"{"type": "mediasite", "metadata": {"name": "x"}, "config": {}}"#;
        let result = decode_service(json.as_bytes());
        assert!(matches!(
            result,
            Err(CodecError::UnsupportedType(ServiceType::Mediasite))
        ));
    }

    #[test]
    fn test_decode_unknown_type_is_unrecognized() {
        let json = r#"{"type": "quic", "metadata": {"name": "x"}, "config": {}}"#;
        let result = decode_service(json.as_bytes());
        assert!(matches!(result, Err(CodecError::UnrecognizedType(t)) if t == "quic"));
    }

    #[test]
    fn test_decode_config_shape_mismatch() {
        let json = r#"{"type": "tcp", "config": {"ports": ["80", "443"]}}"#;
        let result = decode_service(json.as_bytes());
        assert!(matches!(
            result,
            Err(CodecError::InvalidConfig {
                service_type: ServiceType::Tcp,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_missing_config_uses_empty_variant() {
        let json = r#"{"type": "udp", "metadata": {"name": "x"}}"#;
        let decoded = decode_service(json.as_bytes()).unwrap();
        assert_eq!(decoded.config, ServiceConfig::Udp(TcpConfig::default()));
    }

    #[test]
    fn test_decode_ingress_and_timestamps() {
        let json = r#"{
            "type": "tcp",
            "metadata": {"name": "x", "created_at": "2018-03-01T10:00:00Z"},
            "config": {},
            "ingress": [{"ip": "158.39.75.10", "hostname": "lb1.example.com"}]
        }"#;
        let decoded = decode_service(json.as_bytes()).unwrap();
        assert!(decoded.metadata.created_at.is_some());
        assert!(decoded.metadata.updated_at.is_none());
        assert_eq!(decoded.ingress.len(), 1);
        assert_eq!(decoded.ingress[0].ip.as_deref(), Some("158.39.75.10"));
    }

    #[test]
    fn test_decode_services_array_and_stream() {
        let one = String::from_utf8(encode(&tcp_service()).unwrap()).unwrap();
        let two = String::from_utf8(encode(&shared_http_service()).unwrap()).unwrap();

        let array = format!("[{one},{two}]");
        assert_eq!(decode_services(array.as_bytes()).unwrap().len(), 2);

        let stream = format!("{one}\n{two}\n");
        let decoded = decode_services(stream.as_bytes()).unwrap();
        assert_eq!(decoded, vec![tcp_service(), shared_http_service()]);

        assert!(decode_services(b"").unwrap().is_empty());
    }

    #[test]
    fn test_frontend_roundtrip() {
        let frontend = Frontend::new(
            "nird-default-web-tcp",
            vec![ip("10.40.50.23"), ip("2001:700:fffd::23")],
        );
        let encoded = encode_pretty(&frontend).unwrap();
        assert!(encoded.contains("\"type\": \"frontend\""));
        assert_eq!(decode_frontend(encoded.as_bytes()).unwrap(), frontend);
    }

    #[test]
    fn test_decode_frontend_rejects_other_types() {
        let json = r#"{"type": "tcp", "metadata": {"name": "x"}, "config": {}}"#;
        let result = decode_frontends(json.as_bytes());
        assert!(matches!(result, Err(CodecError::NotAFrontend(t)) if t == "tcp"));
    }

    #[test]
    fn test_service_type_parse_and_display() {
        for t in [
            ServiceType::Tcp,
            ServiceType::TcpProxyProtocol,
            ServiceType::Udp,
            ServiceType::SharedHttp,
            ServiceType::Mediasite,
        ] {
            assert_eq!(t.as_str().parse::<ServiceType>().unwrap(), t);
        }
        assert!("TCP".parse::<ServiceType>().is_err());
    }
}

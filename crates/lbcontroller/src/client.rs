//! Load balancer API client
//!
//! Idempotent CRUD for services and frontends. Every call is a single round
//! trip (plus the `Location` dereference for writes) without internal retries;
//! retrying is left to the work queue so the decision lives in one place.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::resource::{self, CodecError, Frontend, Ingress, Metadata, Service};
use crate::retry::{Classify, ErrorKind};

const JSON_CONTENT: &str = "application/json";

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes accepted for a write with `method`
///
/// A create answered with 204 must also carry a `Location`.
fn write_accepted(method: &Method) -> &'static [StatusCode] {
    if *method == Method::PUT {
        &[StatusCode::NO_CONTENT]
    } else {
        &[StatusCode::CREATED, StatusCode::NO_CONTENT]
    }
}

/// Trait for load balancer API operations
///
/// Allows mocking the API in reconciler tests while [`LbApiClient`] is used
/// in production.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, ClientError>;

    /// Fetch a service, `None` if the API does not know it
    async fn get_service(&self, name: &str) -> Result<Option<Service>, ClientError>;

    /// Create a service and return the ingress assigned to it
    async fn create_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError>;

    /// Overwrite a service completely (PUT)
    async fn replace_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError>;

    /// Overwrite the fields present in `service` (PATCH)
    async fn reconfig_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError>;

    /// Delete a service. Deleting an absent service succeeds.
    async fn delete_service(&self, name: &str) -> Result<(), ClientError>;

    async fn list_frontends(&self) -> Result<Vec<Frontend>, ClientError>;

    async fn get_frontend(&self, name: &str) -> Result<Option<Frontend>, ClientError>;

    async fn create_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError>;

    async fn replace_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError>;

    async fn reconfig_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError>;

    async fn delete_frontend(&self, name: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to reach load balancer API at {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: CodecError,
    },
    #[error("failed to encode request body: {0}")]
    Encode(#[source] CodecError),
    #[error("{method} {url} returned 204 without a Location")]
    MissingLocation { method: Method, url: String },
    #[error("invalid Location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("invalid API endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    /// HTTP status of an unexpected API response
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for ClientError {
    fn kind(&self) -> ErrorKind {
        match self {
            // Connection problems and timeouts
            ClientError::Transport { .. } => ErrorKind::Transient,
            // The API may recover, bounded by the queue's retry budget
            ClientError::Status { .. } => ErrorKind::Transient,
            // A malformed payload does not get better by asking again
            ClientError::Decode { .. } => ErrorKind::Permanent,
            ClientError::Encode(_) => ErrorKind::Permanent,
            ClientError::MissingLocation { .. } => ErrorKind::Permanent,
            ClientError::InvalidLocation { .. } => ErrorKind::Permanent,
            ClientError::InvalidEndpoint(_) => ErrorKind::Permanent,
            ClientError::Build(_) => ErrorKind::Permanent,
        }
    }
}

/// Result of a write before the `Location` indirection is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    /// The response body carried the result
    Inline(T),
    /// The API accepted the write and points at where the result can be read
    Deferred(Url),
}

#[derive(Debug, Clone, Copy)]
enum Collection {
    Services,
    Frontends,
}

impl Collection {
    fn path(&self) -> &'static str {
        match self {
            Collection::Services => "services",
            Collection::Frontends => "frontends",
        }
    }
}

struct RawResponse {
    status: StatusCode,
    location: Option<String>,
    body: Vec<u8>,
}

impl RawResponse {
    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }
}

/// Client for the load balancer JSON API
#[derive(Debug, Clone)]
pub struct LbApiClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl LbApiClient {
    /// Create a client for the API rooted at `endpoint`
    ///
    /// `token`, when set, is sent as a bearer token with every request.
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut base = Url::parse(endpoint)
            .map_err(|e| ClientError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self { http, base, token })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn collection_url(&self, collection: Collection) -> Result<Url, ClientError> {
        self.base
            .join(collection.path())
            .map_err(|e| ClientError::InvalidEndpoint(e.to_string()))
    }

    fn item_url(&self, collection: Collection, name: &str) -> Result<Url, ClientError> {
        let mut url = self.collection_url(collection)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidEndpoint(self.base.to_string()))?
            .push(name);
        Ok(url)
    }

    fn resolve_location(&self, location: &str) -> Result<Url, ClientError> {
        self.base
            .join(location)
            .map_err(|e| ClientError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header(ACCEPT, JSON_CONTENT);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<Vec<u8>>,
    ) -> Result<RawResponse, ClientError> {
        let mut builder = self.request(method.clone(), url.clone());
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, JSON_CONTENT).body(body);
        }

        let transport = |source| ClientError::Transport {
            url: url.to_string(),
            source,
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let body = response.bytes().await.map_err(transport)?.to_vec();

        debug!(%method, %url, %status, location = ?location, "API response");

        Ok(RawResponse {
            status,
            location,
            body,
        })
    }

    fn unexpected(method: Method, url: &Url, response: &RawResponse) -> ClientError {
        ClientError::Status {
            method,
            url: url.to_string(),
            status: response.status,
            body: response.body_text(),
        }
    }

    fn decode<T>(
        url: &Url,
        decoder: impl FnOnce(&[u8]) -> Result<T, CodecError>,
        bytes: &[u8],
    ) -> Result<T, ClientError> {
        decoder(bytes).map_err(|source| ClientError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// GET a collection or item; `None` on 404
    async fn read(&self, url: Url) -> Result<Option<RawResponse>, ClientError> {
        let response = self.send(Method::GET, url.clone(), None).await?;
        match response.status {
            StatusCode::OK => Ok(Some(response)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::unexpected(Method::GET, &url, &response)),
        }
    }

    /// Send a write and classify the response into a [`WriteOutcome`]
    async fn write(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
    ) -> Result<WriteOutcome<Vec<u8>>, ClientError> {
        let response = self.send(method.clone(), url.clone(), Some(body)).await?;
        if !write_accepted(&method).contains(&response.status) {
            return Err(Self::unexpected(method, &url, &response));
        }
        match &response.location {
            Some(location) => Ok(WriteOutcome::Deferred(self.resolve_location(location)?)),
            None if method == Method::POST && response.status == StatusCode::NO_CONTENT => {
                Err(ClientError::MissingLocation {
                    method,
                    url: url.to_string(),
                })
            }
            None => Ok(WriteOutcome::Inline(response.body)),
        }
    }

    async fn delete(&self, url: Url) -> Result<(), ClientError> {
        let response = self.send(Method::DELETE, url.clone(), None).await?;
        match response.status {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(%url, "Already absent");
                Ok(())
            }
            _ => Err(Self::unexpected(Method::DELETE, &url, &response)),
        }
    }

    /// Read the ingress list a `Location` header points at
    #[instrument(skip(self))]
    pub async fn fetch_ingress(&self, url: Url) -> Result<Vec<Ingress>, ClientError> {
        let response = self.send(Method::GET, url.clone(), None).await?;
        if response.status != StatusCode::OK {
            return Err(Self::unexpected(Method::GET, &url, &response));
        }
        Self::decode(&url, resource::decode_ingress, &response.body)
    }

    async fn write_service(
        &self,
        method: Method,
        url: Url,
        service: &Service,
    ) -> Result<Vec<Ingress>, ClientError> {
        let body = resource::encode(service).map_err(ClientError::Encode)?;
        let outcome = match self.write(method, url.clone(), body).await? {
            WriteOutcome::Inline(bytes) if bytes.trim_ascii().is_empty() => {
                WriteOutcome::Inline(Vec::new())
            }
            WriteOutcome::Inline(bytes) => {
                WriteOutcome::Inline(Self::decode(&url, resource::decode_ingress, &bytes)?)
            }
            WriteOutcome::Deferred(location) => WriteOutcome::Deferred(location),
        };
        self.resolve_ingress(outcome).await
    }

    /// Normalize a write outcome to the final ingress list
    pub async fn resolve_ingress(
        &self,
        outcome: WriteOutcome<Vec<Ingress>>,
    ) -> Result<Vec<Ingress>, ClientError> {
        match outcome {
            WriteOutcome::Inline(ingress) => Ok(ingress),
            WriteOutcome::Deferred(location) => self.fetch_ingress(location).await,
        }
    }

    async fn write_frontend(
        &self,
        method: Method,
        url: Url,
        frontend: &Frontend,
    ) -> Result<Metadata, ClientError> {
        let body = resource::encode(frontend).map_err(ClientError::Encode)?;
        match self.write(method, url.clone(), body).await? {
            WriteOutcome::Inline(bytes) if bytes.trim_ascii().is_empty() => {
                Ok(frontend.metadata.clone())
            }
            WriteOutcome::Inline(bytes) => Self::decode(&url, resource::decode_metadata, &bytes),
            WriteOutcome::Deferred(location) => {
                let response = self.send(Method::GET, location.clone(), None).await?;
                if response.status != StatusCode::OK {
                    return Err(Self::unexpected(Method::GET, &location, &response));
                }
                let created = Self::decode(&location, resource::decode_frontend, &response.body)?;
                Ok(created.metadata)
            }
        }
    }
}

#[async_trait]
impl LoadBalancerApi for LbApiClient {
    #[instrument(skip(self))]
    async fn list_services(&self) -> Result<Vec<Service>, ClientError> {
        let url = self.collection_url(Collection::Services)?;
        match self.read(url.clone()).await? {
            Some(response) => Self::decode(&url, resource::decode_services, &response.body),
            None => Err(ClientError::Status {
                method: Method::GET,
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn get_service(&self, name: &str) -> Result<Option<Service>, ClientError> {
        let url = self.item_url(Collection::Services, name)?;
        let Some(response) = self.read(url.clone()).await? else {
            debug!(name, "Service not found");
            return Ok(None);
        };

        let mut service = Self::decode(&url, resource::decode_service, &response.body)?;
        if let Some(location) = &response.location {
            let location = self.resolve_location(location)?;
            service.ingress = self.fetch_ingress(location).await?;
        }
        Ok(Some(service))
    }

    #[instrument(skip(self, service), fields(name = %service.name()))]
    async fn create_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError> {
        let url = self.collection_url(Collection::Services)?;
        self.write_service(Method::POST, url, service).await
    }

    #[instrument(skip(self, service), fields(name = %service.name()))]
    async fn replace_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError> {
        let url = self.item_url(Collection::Services, service.name())?;
        self.write_service(Method::PUT, url, service).await
    }

    #[instrument(skip(self, service), fields(name = %service.name()))]
    async fn reconfig_service(&self, service: &Service) -> Result<Vec<Ingress>, ClientError> {
        let url = self.item_url(Collection::Services, service.name())?;
        self.write_service(Method::PATCH, url, service).await
    }

    #[instrument(skip(self))]
    async fn delete_service(&self, name: &str) -> Result<(), ClientError> {
        let url = self.item_url(Collection::Services, name)?;
        self.delete(url).await
    }

    #[instrument(skip(self))]
    async fn list_frontends(&self) -> Result<Vec<Frontend>, ClientError> {
        let url = self.collection_url(Collection::Frontends)?;
        match self.read(url.clone()).await? {
            Some(response) => Self::decode(&url, resource::decode_frontends, &response.body),
            None => Err(ClientError::Status {
                method: Method::GET,
                url: url.to_string(),
                status: StatusCode::NOT_FOUND,
                body: String::new(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn get_frontend(&self, name: &str) -> Result<Option<Frontend>, ClientError> {
        let url = self.item_url(Collection::Frontends, name)?;
        match self.read(url.clone()).await? {
            Some(response) => {
                Self::decode(&url, resource::decode_frontend, &response.body).map(Some)
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, frontend), fields(name = %frontend.name()))]
    async fn create_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError> {
        let url = self.collection_url(Collection::Frontends)?;
        self.write_frontend(Method::POST, url, frontend).await
    }

    #[instrument(skip(self, frontend), fields(name = %frontend.name()))]
    async fn replace_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError> {
        let url = self.item_url(Collection::Frontends, frontend.name())?;
        self.write_frontend(Method::PUT, url, frontend).await
    }

    #[instrument(skip(self, frontend), fields(name = %frontend.name()))]
    async fn reconfig_frontend(&self, frontend: &Frontend) -> Result<Metadata, ClientError> {
        let url = self.item_url(Collection::Frontends, frontend.name())?;
        self.write_frontend(Method::PATCH, url, frontend).await
    }

    #[instrument(skip(self))]
    async fn delete_frontend(&self, name: &str) -> Result<(), ClientError> {
        let url = self.item_url(Collection::Frontends, name)?;
        self.delete(url).await
    }
}

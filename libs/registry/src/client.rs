//! OCI distribution client.
//!
//! Implements the pull and push endpoints of the OCI distribution API on top
//! of reqwest:
//!
//! - `HEAD`/`GET`/`PUT /v2/<repo>/manifests/<reference>`
//! - `HEAD`/`GET /v2/<repo>/blobs/<digest>`
//! - `POST /v2/<repo>/blobs/uploads/` followed by a monolithic
//!   `PUT <location>?digest=<digest>`
//!
//! Reference: https://github.com/opencontainers/distribution-spec

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use onmetal_oci::{media_type, BlobStream, Descriptor, Digest, Reference};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, info};

use crate::auth::{self, Challenge, TokenCache};
use crate::credentials::CredentialStore;
use crate::error::RegistryError;
use crate::registry::Registry;

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Largest manifest accepted from a registry.
const MAX_MANIFEST_SIZE: usize = 4 * 1024 * 1024;

const PULL: &str = "pull";
const PUSH: &str = "pull,push";

/// Configuration for [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Credentials by registry host.
    pub credentials: CredentialStore,
    /// Hosts reached over plain HTTP. Loopback hosts always are.
    pub plain_http: Vec<String>,
    /// Timeout for manifest, existence and token requests.
    pub request_timeout: Duration,
    /// Connect timeout for all requests, including blob transfers.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialStore::anonymous(),
            plain_http: Vec::new(),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            user_agent: concat!("onmetal-image/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Authenticated OCI distribution client.
///
/// Connections are opened lazily per request. Bearer tokens are cached per
/// host and repository scope for the lifetime of the client.
pub struct RegistryClient {
    config: RegistryConfig,
    client: Client,
    tokens: TokenCache,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            client,
            tokens: TokenCache::default(),
        })
    }

    fn uses_plain_http(&self, host: &str) -> bool {
        if self.config.plain_http.iter().any(|h| h == host) {
            return true;
        }
        let name = match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        };
        matches!(name, "localhost" | "[::1]") || name.starts_with("127.")
    }

    fn base_url(&self, reference: &Reference) -> String {
        let host = reference.registry_host();
        let scheme = if self.uses_plain_http(host) { "http" } else { "https" };
        format!("{scheme}://{host}")
    }

    fn repo_url(&self, reference: &Reference) -> String {
        format!("{}/v2/{}", self.base_url(reference), reference.repository())
    }

    /// Send a request, answering one authentication challenge if needed.
    ///
    /// `build` is called again for the retry, so it must not consume a
    /// one-shot body.
    async fn send<F>(
        &self,
        reference: &Reference,
        actions: &str,
        build: F,
    ) -> Result<Response, RegistryError>
    where
        F: Fn() -> RequestBuilder,
    {
        let host = reference.registry_host();
        let scope = format!("repository:{}:{actions}", reference.repository());

        let cached = self.tokens.get(host, &scope).await;
        let response = with_auth(build(), cached.as_deref()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(challenge) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse)
        else {
            return Ok(response);
        };

        let credential = self.config.credentials.get(reference.domain());
        let Some(value) = auth::answer(&self.client, &challenge, &scope, credential).await? else {
            return Ok(response);
        };
        if cached.as_deref() == Some(value.as_str()) {
            return Ok(response);
        }

        debug!(host = %host, scope = %scope, "Authenticated to registry");
        self.tokens.insert(host, &scope, value.clone()).await;
        Ok(build().header(AUTHORIZATION, value).send().await?)
    }

    /// Fetch manifest bytes by tag or digest.
    async fn get_manifest(
        &self,
        reference: &Reference,
        target: &str,
    ) -> Result<(Bytes, HeaderMap), RegistryError> {
        let url = format!("{}/manifests/{target}", self.repo_url(reference));
        debug!(url = %url, "Pulling manifest");

        let response = self
            .send(reference, PULL, || {
                self.client
                    .get(&url)
                    .header(ACCEPT, accept_header())
                    .timeout(self.config.request_timeout)
            })
            .await?;
        let response = check(response, &format!("{}@{target}", reference.name()))?;

        if response
            .content_length()
            .is_some_and(|len| len > MAX_MANIFEST_SIZE as u64)
        {
            return Err(RegistryError::invalid_response(url, "manifest too large"));
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        if body.len() > MAX_MANIFEST_SIZE {
            return Err(RegistryError::invalid_response(url, "manifest too large"));
        }
        Ok((body, headers))
    }

    /// Build a descriptor from a full manifest fetch, for registries whose
    /// `HEAD` responses lack the needed headers.
    async fn resolve_by_get(&self, reference: &Reference) -> Result<Descriptor, RegistryError> {
        let (body, headers) = self.get_manifest(reference, &reference.target()).await?;

        let digest = match reference.digest() {
            Some(expected) => {
                let actual = Digest::compute(expected.algorithm(), &body);
                if actual != *expected {
                    return Err(RegistryError::DigestMismatch {
                        expected: expected.clone(),
                        actual,
                    });
                }
                actual
            }
            None => Digest::sha256(&body),
        };

        let media_type = match content_type(&headers) {
            Some(media_type) => media_type,
            None => embedded_media_type(&body).ok_or_else(|| {
                RegistryError::invalid_response(reference.to_string(), "manifest has no media type")
            })?,
        };

        Ok(Descriptor::new(media_type, digest, body.len() as u64))
    }
}

#[async_trait]
impl Registry for RegistryClient {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, RegistryError> {
        let url = format!("{}/manifests/{}", self.repo_url(reference), reference.target());
        debug!(url = %url, "Resolving reference");

        let response = self
            .send(reference, PULL, || {
                self.client
                    .head(&url)
                    .header(ACCEPT, accept_header())
                    .timeout(self.config.request_timeout)
            })
            .await?;
        let response = check(response, &reference.to_string())?;
        let headers = response.headers();

        let header_digest = headers
            .get(DOCKER_CONTENT_DIGEST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Digest::parse(v).ok());
        let size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|len| *len > 0);
        let media_type = content_type(headers);

        if let (Some(expected), Some(actual)) = (reference.digest(), &header_digest) {
            if expected != actual {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }

        let digest = reference.digest().cloned().or(header_digest);
        match (digest, size, media_type) {
            (Some(digest), Some(size), Some(media_type)) => {
                Ok(Descriptor::new(media_type, digest, size))
            }
            _ => self.resolve_by_get(reference).await,
        }
    }

    async fn fetch_manifest(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<Bytes, RegistryError> {
        let (body, _) = self
            .get_manifest(reference, &descriptor.digest.to_string())
            .await?;

        let actual = Digest::compute(descriptor.digest.algorithm(), &body);
        if actual != descriptor.digest {
            return Err(RegistryError::DigestMismatch {
                expected: descriptor.digest.clone(),
                actual,
            });
        }

        Ok(body)
    }

    async fn fetch_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
    ) -> Result<BlobStream, RegistryError> {
        let url = format!("{}/blobs/{}", self.repo_url(reference), descriptor.digest);
        debug!(url = %url, "Pulling blob");

        let response = self
            .send(reference, PULL, || self.client.get(&url))
            .await?;
        let response = check(response, &descriptor.digest.to_string())?;

        Ok(Box::pin(response.bytes_stream().map_err(io::Error::other)))
    }

    async fn blob_exists(
        &self,
        reference: &Reference,
        digest: &Digest,
    ) -> Result<bool, RegistryError> {
        let url = format!("{}/blobs/{digest}", self.repo_url(reference));

        let response = self
            .send(reference, PUSH, || {
                self.client.head(&url).timeout(self.config.request_timeout)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, &digest.to_string())?;
        Ok(true)
    }

    async fn push_blob(
        &self,
        reference: &Reference,
        descriptor: &Descriptor,
        content: BlobStream,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/blobs/uploads/", self.repo_url(reference));
        let resource = descriptor.digest.to_string();

        // The upload session request also settles authentication, since the
        // streamed body below cannot be replayed.
        let response = self
            .send(reference, PUSH, || {
                self.client
                    .post(&url)
                    .header(CONTENT_LENGTH, 0)
                    .timeout(self.config.request_timeout)
            })
            .await?;
        let response = check(response, &resource)?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::invalid_response(&url, "upload has no location"))?;
        let base = Url::parse(&self.base_url(reference))
            .map_err(|e| RegistryError::invalid_response(&url, e))?;
        let mut upload = base
            .join(location)
            .map_err(|e| RegistryError::invalid_response(&url, e))?;
        upload.query_pairs_mut().append_pair("digest", &resource);

        let scope = format!("repository:{}:{PUSH}", reference.repository());
        let cached = self.tokens.get(reference.registry_host(), &scope).await;
        let request = self
            .client
            .put(upload)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, descriptor.size)
            .body(Body::wrap_stream(content));
        let response = with_auth(request, cached.as_deref()).send().await?;
        check(response, &resource)?;

        info!(
            repository = %reference.name(),
            digest = %descriptor.digest,
            size = descriptor.size,
            "Blob uploaded"
        );
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &Reference,
        target: &str,
        descriptor: &Descriptor,
        content: Bytes,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/manifests/{target}", self.repo_url(reference));

        let response = self
            .send(reference, PUSH, || {
                self.client
                    .put(&url)
                    .header(CONTENT_TYPE, descriptor.media_type.as_str())
                    .timeout(self.config.request_timeout)
                    .body(content.clone())
            })
            .await?;
        check(response, &format!("{}:{target}", reference.name()))?;

        info!(
            repository = %reference.name(),
            target = %target,
            digest = %descriptor.digest,
            "Manifest uploaded"
        );
        Ok(())
    }
}

fn with_auth(request: RequestBuilder, authorization: Option<&str>) -> RequestBuilder {
    match authorization {
        Some(value) => request.header(AUTHORIZATION, value),
        None => request,
    }
}

fn check(response: Response, resource: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::NOT_FOUND => RegistryError::NotFound(resource.to_string()),
        StatusCode::UNAUTHORIZED => RegistryError::AuthRequired(resource.to_string()),
        StatusCode::FORBIDDEN => RegistryError::Denied(resource.to_string()),
        status => RegistryError::UnexpectedStatus {
            status: status.as_u16(),
            resource: resource.to_string(),
        },
    })
}

fn accept_header() -> String {
    media_type::ACCEPTED_MANIFESTS.join(", ")
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media_type = value.split(';').next()?.trim();
    media_type::ACCEPTED_MANIFESTS
        .contains(&media_type)
        .then(|| media_type.to_string())
}

fn embedded_media_type(body: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MediaTypeField {
        media_type: Option<String>,
    }

    serde_json::from_slice::<MediaTypeField>(body).ok()?.media_type
}

use crate::auth::{basic_header, Challenge, TokenResponse};
use crate::config::{RegistryConfig, TransportConfig};
use crate::{header_str, read_body, RemoteError, Transport};
use mlist_schema::{
    Descriptor, Digest, ImageReference, Index, MediaType, Platform, SchemaError, DEFAULT_REGISTRY,
    INDEX_ACCEPT, MANIFEST_ACCEPT,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use ureq::http::Response;
use ureq::Body;

const DOCKER_HUB_API: &str = "registry-1.docker.io";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Head,
    Put,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// Token scope actions requested for a call.
#[derive(Debug, Clone, Copy)]
enum Access {
    Pull,
    Push,
    Delete,
}

impl Access {
    fn actions(self) -> &'static str {
        match self {
            Access::Pull => "pull",
            Access::Push => "pull,push",
            Access::Delete => "delete",
        }
    }
}

struct Call<'a> {
    method: Method,
    url: String,
    headers: Vec<(&'static str, &'a str)>,
    body: Option<&'a [u8]>,
}

impl<'a> Call<'a> {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    fn header(mut self, name: &'static str, value: &'a str) -> Self {
        self.headers.push((name, value));
        self
    }

    fn body(mut self, body: &'a [u8]) -> Self {
        self.body = Some(body);
        self
    }
}

/// OCI distribution API client.
///
/// Uses:
/// - `GET  /v2/<repo>/manifests/<ref>`   resolve a manifest
/// - `GET  /v2/<repo>/blobs/<digest>`    read an image config for its platform
/// - `HEAD /v2/<repo>/manifests/<digest>` check a child exists before pushing
/// - `PUT  /v2/<repo>/manifests/<tag>`   publish an index
/// - `DELETE /v2/<repo>/manifests/<digest>`
///
/// Authenticates with a configured static token, or by answering a
/// `WWW-Authenticate` challenge (bearer token exchange or basic credentials).
pub struct RegistryTransport {
    config: TransportConfig,
    agent: ureq::Agent,
    tokens: Mutex<HashMap<String, String>>,
}

impl RegistryTransport {
    pub fn new(config: TransportConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            config,
            agent,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Scheme and host for API calls against `registry`.
    pub fn base_url(&self, registry: &str) -> String {
        let insecure = self
            .config
            .registry(registry)
            .is_some_and(|r| r.insecure)
            || is_loopback(registry);
        let scheme = if insecure { "http" } else { "https" };
        let host = if registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API
        } else {
            registry
        };
        format!("{scheme}://{host}")
    }

    fn manifest_url(&self, reference: &ImageReference, target: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{target}",
            self.base_url(&reference.registry),
            reference.repository
        )
    }

    fn blob_url(&self, reference: &ImageReference, digest: &str) -> String {
        format!(
            "{}/v2/{}/blobs/{digest}",
            self.base_url(&reference.registry),
            reference.repository
        )
    }

    fn dispatch(&self, call: &Call<'_>, auth: Option<&str>) -> Result<Response<Body>, RemoteError> {
        fn apply<B>(
            mut req: ureq::RequestBuilder<B>,
            call: &Call<'_>,
            auth: Option<&str>,
        ) -> ureq::RequestBuilder<B> {
            for (name, value) in &call.headers {
                req = req.header(*name, *value);
            }
            if let Some(auth) = auth {
                req = req.header("Authorization", auth);
            }
            req
        }

        let url = call.url.as_str();
        let result = match call.method {
            Method::Get => apply(self.agent.get(url), call, auth).call(),
            Method::Head => apply(self.agent.head(url), call, auth).call(),
            Method::Delete => apply(self.agent.delete(url), call, auth).call(),
            Method::Put => apply(self.agent.put(url), call, auth).send(call.body.unwrap_or_default()),
        };
        result.map_err(|e| RemoteError::Http(format!("{} {url}: {e}", call.method.as_str())))
    }

    /// Run `call`, answering one authentication challenge if the registry asks.
    fn execute(
        &self,
        reference: &ImageReference,
        access: Access,
        call: &Call<'_>,
    ) -> Result<Response<Body>, RemoteError> {
        debug!("{} {}", call.method.as_str(), call.url);
        let key = format!(
            "{}/{}:{}",
            reference.registry,
            reference.repository,
            access.actions()
        );
        let registry = self.config.registry(&reference.registry);
        let current = self
            .cached_token(&key)
            .or_else(|| registry.and_then(|r| r.token.as_ref().map(|t| format!("Bearer {t}"))));

        let resp = self.dispatch(call, current.as_deref())?;
        if resp.status().as_u16() != 401 {
            return Ok(resp);
        }

        let unauthorized = || RemoteError::Unauthorized(reference.repository_reference());
        let challenge = header_str(&resp, "www-authenticate")
            .and_then(Challenge::parse)
            .ok_or_else(unauthorized)?;
        let fresh = match challenge {
            Challenge::Basic => {
                let (user, pass) = registry
                    .and_then(RegistryConfig::basic_credentials)
                    .ok_or_else(unauthorized)?;
                basic_header(user, pass)
            }
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope = scope.unwrap_or_else(|| {
                    format!("repository:{}:{}", reference.repository, access.actions())
                });
                let token = self.request_token(registry, &realm, service.as_deref(), &scope)?;
                format!("Bearer {token}")
            }
        };
        if current.as_deref() == Some(fresh.as_str()) {
            return Err(unauthorized());
        }
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(key, fresh.clone());
        }

        let resp = self.dispatch(call, Some(&fresh))?;
        if resp.status().as_u16() == 401 {
            return Err(unauthorized());
        }
        Ok(resp)
    }

    fn cached_token(&self, key: &str) -> Option<String> {
        self.tokens.lock().ok()?.get(key).cloned()
    }

    fn request_token(
        &self,
        registry: Option<&RegistryConfig>,
        realm: &str,
        service: Option<&str>,
        scope: &str,
    ) -> Result<String, RemoteError> {
        debug!("requesting token from {realm} for {scope}");
        let mut req = self.agent.get(realm).query("scope", scope);
        if let Some(service) = service {
            req = req.query("service", service);
        }
        if let Some((user, pass)) = registry.and_then(RegistryConfig::basic_credentials) {
            req = req.header("Authorization", basic_header(user, pass));
        }
        let resp = req
            .call()
            .map_err(|e| RemoteError::Http(format!("GET {realm}: {e}")))?;
        let code = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(RemoteError::Unauthorized(format!(
                "token endpoint {realm} returned HTTP {code}"
            )));
        }
        let body = read_body(resp)?;
        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        parsed
            .into_token()
            .ok_or_else(|| RemoteError::Unauthorized(format!("token endpoint {realm} returned no token")))
    }

    /// Platform of an image manifest, read from its config blob.
    fn platform_of(
        &self,
        reference: &ImageReference,
        manifest: &[u8],
    ) -> Result<Platform, RemoteError> {
        let manifest: ImageManifest =
            serde_json::from_slice(manifest).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let url = self.blob_url(reference, &manifest.config.digest);
        let resp = self.execute(reference, Access::Pull, &Call::new(Method::Get, url))?;
        let resp = check_status(resp, &manifest.config.digest)?;
        let body = read_body(resp)?;
        let config: ImageConfig =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        Ok(Platform {
            architecture: config.architecture,
            os: config.os,
            variant: config.variant.filter(|v| !v.is_empty()),
            os_version: config.os_version.filter(|v| !v.is_empty()),
        })
    }

    /// Digest a tag currently points at.
    fn resolve_digest(&self, reference: &ImageReference) -> Result<Digest, RemoteError> {
        if let Some(ref digest) = reference.digest {
            return Ok(digest.clone());
        }
        let url = self.manifest_url(reference, reference.reference_str());
        let call = Call::new(Method::Head, url).header("Accept", MANIFEST_ACCEPT);
        let resp = self.execute(reference, Access::Pull, &call)?;
        let resp = check_status(resp, &reference.full_reference())?;
        if let Some(digest) = header_str(&resp, "docker-content-digest").and_then(|d| Digest::parse(d).ok()) {
            return Ok(digest);
        }

        let url = self.manifest_url(reference, reference.reference_str());
        let call = Call::new(Method::Get, url).header("Accept", MANIFEST_ACCEPT);
        let resp = self.execute(reference, Access::Pull, &call)?;
        let resp = check_status(resp, &reference.full_reference())?;
        Ok(Digest::of(&read_body(resp)?))
    }
}

impl Transport for RegistryTransport {
    fn name(&self) -> &str {
        "registry"
    }

    fn fetch(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError> {
        let url = self.manifest_url(reference, reference.reference_str());
        let call = Call::new(Method::Get, url).header("Accept", MANIFEST_ACCEPT);
        let resp = self.execute(reference, Access::Pull, &call)?;
        let resp = check_status(resp, &reference.full_reference())?;

        let content_type = header_str(&resp, "content-type").map(str::to_owned);
        let advertised = header_str(&resp, "docker-content-digest").map(str::to_owned);
        let body = read_body(resp)?;
        let digest = Digest::of(&body);
        verify_digest(reference, advertised.as_deref(), &digest)?;

        let media_type = content_type
            .as_deref()
            .and_then(|ct| MediaType::parse(ct).ok())
            .or_else(|| embedded_media_type(&body))
            .ok_or_else(|| {
                SchemaError::UnsupportedMediaType(content_type.unwrap_or_else(|| "none".to_owned()))
            })?;

        let platform = if media_type.is_index() {
            None
        } else {
            match self.platform_of(reference, &body) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("no platform for {reference}: {e}");
                    None
                }
            }
        };

        Ok(Descriptor {
            media_type,
            digest,
            size: body.len() as u64,
            platform,
        })
    }

    fn push_index(&self, reference: &ImageReference, index: &Index) -> Result<Digest, RemoteError> {
        // Every child must already be in the target repository, or the tag is left alone.
        for entry in &index.manifests {
            let url = self.manifest_url(reference, entry.digest.as_str());
            let call = Call::new(Method::Head, url).header("Accept", MANIFEST_ACCEPT);
            let resp = self.execute(reference, Access::Push, &call)?;
            match resp.status().as_u16() {
                200..=299 => {}
                404 => {
                    return Err(RemoteError::NotFound(format!(
                        "manifest {} in {}",
                        entry.digest,
                        reference.repository_reference()
                    )))
                }
                code => {
                    return Err(RemoteError::Http(format!(
                        "HTTP {code} checking manifest {}",
                        entry.digest
                    )))
                }
            }
        }

        let body = index.to_json()?;
        let url = self.manifest_url(reference, reference.reference_str());
        let call = Call::new(Method::Put, url)
            .header("Content-Type", index.media_type.as_str())
            .body(&body);
        let resp = self.execute(reference, Access::Push, &call)?;
        let resp = check_status(resp, &reference.full_reference())?;

        let digest = Digest::of(&body);
        if let Some(advertised) = header_str(&resp, "docker-content-digest") {
            if advertised != digest.as_str() {
                warn!("registry reported digest {advertised} for pushed index, computed {digest}");
            }
        }
        debug!("pushed {reference} as {digest}");
        Ok(digest)
    }

    fn fetch_index(&self, reference: &ImageReference) -> Result<Index, RemoteError> {
        let url = self.manifest_url(reference, reference.reference_str());
        let call = Call::new(Method::Get, url).header("Accept", INDEX_ACCEPT);
        let resp = self.execute(reference, Access::Pull, &call)?;
        let resp = check_status(resp, &reference.full_reference())?;
        let content_type = header_str(&resp, "content-type").and_then(|ct| MediaType::parse(ct).ok());
        let body = read_body(resp)?;

        let mut value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        // OCI indexes may omit mediaType; the response header then carries it.
        if let (Some(obj), Some(ct)) = (value.as_object_mut(), content_type) {
            obj.entry("mediaType")
                .or_insert_with(|| serde_json::Value::String(ct.as_str().to_owned()));
        }
        let mut index: Index = serde_json::from_value(value).map_err(SchemaError::from)?;
        if !index.media_type.is_index() {
            return Err(SchemaError::UnsupportedMediaType(format!(
                "{reference} is a single manifest ({}), not an index",
                index.media_type
            ))
            .into());
        }
        index.name = reference.to_string();
        Ok(index)
    }

    fn delete_manifest(&self, reference: &ImageReference) -> Result<Digest, RemoteError> {
        let digest = self.resolve_digest(reference)?;
        let url = self.manifest_url(reference, digest.as_str());
        let resp = self.execute(reference, Access::Delete, &Call::new(Method::Delete, url))?;
        match resp.status().as_u16() {
            200..=299 => Ok(digest),
            404 => Err(RemoteError::NotFound(reference.full_reference())),
            405 => Err(RemoteError::Http(format!(
                "registry {} does not allow manifest deletion",
                reference.registry
            ))),
            code => Err(RemoteError::Http(format!(
                "HTTP {code} deleting {reference}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageManifest {
    config: ConfigRef,
}

#[derive(Debug, Deserialize)]
struct ConfigRef {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    architecture: String,
    #[serde(default)]
    os: String,
    #[serde(default)]
    variant: Option<String>,
    #[serde(rename = "os.version", default)]
    os_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

fn is_loopback(registry: &str) -> bool {
    let host = registry
        .rsplit_once(':')
        .filter(|(_, port)| port.bytes().all(|b| b.is_ascii_digit()))
        .map_or(registry, |(host, _)| host);
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

fn embedded_media_type(body: &[u8]) -> Option<MediaType> {
    #[derive(Deserialize)]
    struct Probe {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
    }
    let probe: Probe = serde_json::from_slice(body).ok()?;
    MediaType::parse(&probe.media_type?).ok()
}

fn verify_digest(
    reference: &ImageReference,
    advertised: Option<&str>,
    actual: &Digest,
) -> Result<(), RemoteError> {
    let expected = reference
        .digest
        .as_ref()
        .map(Digest::as_str)
        .or(advertised.filter(|d| d.starts_with("sha256:")));
    match expected {
        Some(expected) if expected != actual.as_str() => Err(RemoteError::IntegrityFailure {
            key: reference.full_reference(),
            expected: expected.to_owned(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

fn check_status(resp: Response<Body>, what: &str) -> Result<Response<Body>, RemoteError> {
    let code = resp.status().as_u16();
    match code {
        200..=299 => Ok(resp),
        404 => Err(RemoteError::NotFound(what.to_owned())),
        401 | 403 => Err(RemoteError::Unauthorized(format!("HTTP {code} for {what}"))),
        _ => {
            let body = read_body(resp).unwrap_or_default();
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.errors.into_iter().next())
                .map(|e| format!(": {} {}", e.code, e.message))
                .unwrap_or_default();
            Err(RemoteError::Http(format!("HTTP {code} for {what}{detail}")))
        }
    }
}

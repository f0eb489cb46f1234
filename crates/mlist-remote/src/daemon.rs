use crate::config::TransportConfig;
use crate::{read_body, RemoteError, Transport};
use mlist_schema::{Descriptor, Digest, ImageReference, MediaType, Platform};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Resolves references through a Docker Engine's `/distribution/<ref>/json`
/// endpoint. The engine contacts the registry with its own credentials.
///
/// Lookup only: publishing and deletion are left to [`RegistryTransport`](crate::RegistryTransport).
pub struct DaemonTransport {
    host: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DistributionInspect {
    descriptor: EngineDescriptor,
    #[serde(default)]
    platforms: Vec<EnginePlatform>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EngineDescriptor {
    media_type: String,
    digest: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct EnginePlatform {
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
struct EngineError {
    #[serde(default)]
    message: String,
}

impl DaemonTransport {
    /// `host` is an `http://` URL or a `tcp://host:port` Docker host.
    pub fn new(host: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(host, Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS))
    }

    /// Use `daemon_host` from the config, falling back to a `tcp://` `DOCKER_HOST`.
    pub fn from_config(config: &TransportConfig) -> Result<Self, RemoteError> {
        let host = match config.daemon_host.clone() {
            Some(host) => host,
            None => std::env::var("DOCKER_HOST").map_err(|_| {
                RemoteError::Config(
                    "daemon transport needs daemon_host or a tcp:// DOCKER_HOST".to_owned(),
                )
            })?,
        };
        Self::with_timeout(&host, Duration::from_secs(config.timeout_secs))
    }

    fn with_timeout(host: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let host = normalize_host(host)?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Ok(Self { host, agent })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

fn normalize_host(host: &str) -> Result<String, RemoteError> {
    let host = host.trim().trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(format!("http://{rest}"));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_owned());
    }
    Err(RemoteError::Config(format!(
        "unsupported daemon host '{host}', expected http://, https:// or tcp://"
    )))
}

impl Transport for DaemonTransport {
    fn name(&self) -> &str {
        "daemon"
    }

    fn fetch(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError> {
        let url = format!("{}/distribution/{}/json", self.host, reference.full_reference());
        debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| RemoteError::Http(format!("GET {url}: {e}")))?;
        let code = resp.status().as_u16();
        let body = read_body(resp)?;
        if code >= 400 {
            let message = serde_json::from_slice::<EngineError>(&body)
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(match code {
                404 => RemoteError::NotFound(reference.full_reference()),
                401 | 403 => RemoteError::Unauthorized(message),
                _ => RemoteError::Http(format!("HTTP {code} from daemon: {message}")),
            });
        }

        let inspect: DistributionInspect =
            serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let media_type = MediaType::parse(&inspect.descriptor.media_type)?;
        let digest = Digest::parse(&inspect.descriptor.digest)?;
        if let Some(ref pinned) = reference.digest {
            if *pinned != digest {
                return Err(RemoteError::IntegrityFailure {
                    key: reference.full_reference(),
                    expected: pinned.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        // A single platform only describes the manifest itself when it is not a list.
        let platform = match inspect.platforms.as_slice() {
            [p] if !media_type.is_index() => Some(Platform {
                architecture: p.architecture.clone(),
                os: p.os.clone(),
                variant: p.variant.clone().filter(|v| !v.is_empty()),
                os_version: p.os_version.clone().filter(|v| !v.is_empty()),
            }),
            _ => None,
        };

        Ok(Descriptor {
            media_type,
            digest,
            size: inspect.descriptor.size,
            platform,
        })
    }
}

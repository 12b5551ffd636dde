//! Identifier-resolution fallback for repositories without native
//! file-listing support.
//!
//! Given an arbitrary persistent identifier, [`ShareResolver::resolve`]
//! normalizes it to a URL, follows HTTP redirects (non-following HEAD
//! probes, bounded hop count) until a public share URL is found, then
//! gathers file descriptors from the share's REST surface - directly for a
//! single shared file, or via a bounded-worker-pool crawl for a shared
//! directory tree.
//!
//! `resolve` never raises past this boundary: every failure is logged and
//! collapses to "no result".

mod crawl;

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use reqwest::header::LOCATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

/// Public DOI resolver used to turn bare DOIs into URLs.
const DOI_RESOLVER_ADDRESS: &str = "https://doi.org";

/// Maximum redirect hops before a branch is abandoned.
const MAX_REDIRECT_HOPS: usize = 100;

/// Timeout for redirect probes and share REST calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of crawl workers per `resolve` call.
const DEFAULT_CRAWL_WORKERS: usize = 8;

/// REST base path exposed on a share's domain.
const SHARE_API_PREFIX: &str = "/api/v3/onezone";

/// DOI syntax: `10.<4-9 digits>/<suffix>`.
#[allow(clippy::expect_used)]
static DOI_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^10\.\d{4,9}/[-._;()/:a-z0-9]+$").expect("DOI regex is valid") // Static pattern, safe to panic
});

/// Share URLs look like `https://<domain>/share/<id>`.
#[allow(clippy::expect_used)]
static SHARE_LINK_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+/share/[A-Za-z0-9]+$").expect("share link regex is valid") // Static pattern, safe to panic
});

/// Failed to construct the resolver's HTTP client.
#[derive(Debug, Error)]
#[error("failed to construct resolver HTTP client: {0}")]
pub struct ResolverBuildError(#[from] reqwest::Error);

/// One file discovered through the resolution fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    /// Retrieval link.
    pub link: String,
    /// File name, when the listing carried one.
    pub name: Option<String>,
    /// Size in bytes, when the listing carried one.
    pub size: Option<i64>,
    /// Checksum placeholder; the share surface does not expose hashes.
    pub checksum_value: Option<String>,
    /// Declared checksum algorithm for the placeholder.
    pub checksum_type: String,
    /// Provenance of the file within the share.
    pub provenance: ShareProvenance,
}

/// Share-specific provenance fields of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareProvenance {
    /// Domain hosting the share.
    pub domain: String,
    /// Owning space id.
    pub space_id: String,
    /// File id within the share.
    pub file_id: String,
    /// Shares are public by construction.
    pub public_access: bool,
}

// ==================== share REST surface ====================

#[derive(Debug, Error)]
pub(crate) enum ShareApiError {
    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {url}: {detail}")]
    MalformedResponse { url: String, detail: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ShareRoot {
    pub root_file_id: String,
    #[serde(default = "unknown_space")]
    pub space_id: String,
    pub file_type: String,
}

fn unknown_space() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileAttributes {
    pub file_id: String,
    pub name: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChildrenPage {
    #[serde(default)]
    pub children: Vec<ChildEntry>,
    #[serde(default)]
    pub is_last: bool,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChildEntry {
    pub file_id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub size: Option<i64>,
}

/// Client for one share domain's REST surface.
#[derive(Debug)]
pub(crate) struct ShareApi {
    client: Client,
    base: String,
    domain: String,
}

impl ShareApi {
    fn new(scheme: &str, domain: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            base: format!("{scheme}://{domain}{SHARE_API_PREFIX}"),
            domain: domain.to_string(),
        })
    }

    pub(crate) fn domain(&self) -> &str {
        &self.domain
    }

    /// Retrieval link for a file id, rooted at the REST surface.
    pub(crate) fn file_link(&self, file_id: &str) -> String {
        format!("{}/{}", self.base, file_id)
    }

    pub(crate) async fn share_public(&self, share_id: &str) -> Result<ShareRoot, ShareApiError> {
        self.get_json(&format!("/shares/{share_id}/public"), None)
            .await
    }

    pub(crate) async fn file_attributes(
        &self,
        file_id: &str,
    ) -> Result<FileAttributes, ShareApiError> {
        self.get_json(
            &format!("/shares/data/{file_id}"),
            Some(serde_json::json!({"attributes": ["fileId", "name", "size"]})),
        )
        .await
    }

    pub(crate) async fn list_children(
        &self,
        file_id: &str,
        token: Option<&str>,
    ) -> Result<ChildrenPage, ShareApiError> {
        self.get_json(
            &format!("/shares/data/{file_id}/children"),
            Some(serde_json::json!({
                "attributes": ["fileId", "name", "type", "size"],
                "token": token,
            })),
        )
        .await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ShareApiError> {
        let url = format!("{}{path}", self.base);
        let mut request = self.client.get(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| ShareApiError::Network {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShareApiError::HttpStatus {
                url,
                status: status.as_u16(),
                body: if body.is_empty() {
                    "<empty>".to_string()
                } else {
                    body
                },
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ShareApiError::MalformedResponse {
                url,
                detail: e.to_string(),
            })
    }
}

pub(crate) fn build_descriptor(
    api: &ShareApi,
    space_id: &str,
    file_id: &str,
    name: Option<String>,
    size: Option<i64>,
) -> FileDescriptor {
    FileDescriptor {
        link: api.file_link(file_id),
        name,
        size,
        checksum_value: None,
        checksum_type: "md5".to_string(),
        provenance: ShareProvenance {
            domain: api.domain().to_string(),
            space_id: space_id.to_string(),
            file_id: file_id.to_string(),
            public_access: true,
        },
    }
}

// ==================== resolver ====================

/// Resolves persistent identifiers to share file descriptors.
pub struct ShareResolver {
    probe_client: Client,
    doi_resolver_base: String,
    workers: usize,
}

impl ShareResolver {
    /// Creates a resolver with the public DOI resolver and default worker
    /// count.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverBuildError`] if HTTP client construction fails.
    pub fn new() -> Result<Self, ResolverBuildError> {
        Self::with_doi_resolver_base(DOI_RESOLVER_ADDRESS)
    }

    /// Creates a resolver with a custom DOI resolver base URL (for testing
    /// with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ResolverBuildError`] if HTTP client construction fails.
    pub fn with_doi_resolver_base(
        doi_resolver_base: impl Into<String>,
    ) -> Result<Self, ResolverBuildError> {
        // Redirects are observed, never followed: each hop is an explicit,
        // counted probe.
        let probe_client = Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            probe_client,
            doi_resolver_base: doi_resolver_base.into(),
            workers: DEFAULT_CRAWL_WORKERS,
        })
    }

    /// Sets the crawl worker count.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Resolves an identifier to the flat list of file descriptors behind
    /// its share, or `None` when the identifier is not resolvable.
    ///
    /// All failures (unsupported identifier shape, connection errors,
    /// timeouts, redirect loops, protocol surprises) are logged and
    /// absorbed; this method never returns an error.
    pub async fn resolve(&self, identifier: &str) -> Option<Vec<FileDescriptor>> {
        info!(identifier = %identifier, "attempting to resolve identifier as a share dataset");

        let share_url = self.locate_share(identifier).await?;
        let files = self.gather_from_share(&share_url).await?;

        info!(
            identifier = %identifier,
            files = files.len(),
            "successfully resolved a share dataset"
        );
        Some(files)
    }

    /// Walks redirects from the normalized identifier URL until a share
    /// URL appears, up to [`MAX_REDIRECT_HOPS`] probes.
    async fn locate_share(&self, identifier: &str) -> Option<Url> {
        let mut current = self.identifier_to_url(identifier)?;

        for _hop in 0..MAX_REDIRECT_HOPS {
            if SHARE_LINK_SHAPE.is_match(&current) {
                match Url::parse(&current) {
                    Ok(url) => return Some(url),
                    Err(parse_error) => {
                        warn!(url = %current, error = %parse_error, "share-shaped URL failed to parse");
                        return None;
                    }
                }
            }
            current = self.peek_redirect(&current).await?;
        }

        error!(
            identifier = %identifier,
            "resigning after reaching max redirects ({MAX_REDIRECT_HOPS})"
        );
        None
    }

    fn identifier_to_url(&self, identifier: &str) -> Option<String> {
        let identifier = identifier.trim();
        let lowered = identifier.to_ascii_lowercase();

        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            return Some(identifier.to_string());
        }
        if DOI_SHAPE.is_match(identifier) {
            return Some(format!("{}/{identifier}", self.doi_resolver_base));
        }

        error!(
            identifier = %identifier,
            "identifier does not look like either a DOI or a URL"
        );
        None
    }

    /// Issues a single non-following HEAD probe and returns the redirect
    /// target, or `None` for any non-redirect outcome.
    async fn peek_redirect(&self, url: &str) -> Option<String> {
        let response = match self.probe_client.head(url).send().await {
            Ok(response) => response,
            Err(probe_error) if probe_error.is_timeout() => {
                warn!(
                    url = %url,
                    "cannot resolve a redirection: request timed out after {}s",
                    REQUEST_TIMEOUT.as_secs()
                );
                return None;
            }
            Err(probe_error) if probe_error.is_connect() => {
                warn!(
                    url = %url,
                    "cannot resolve a redirection: connection error (host unreachable or DNS failure)"
                );
                return None;
            }
            Err(probe_error) => {
                warn!(url = %url, error = %probe_error, "cannot resolve a redirection: request failed");
                return None;
            }
        };

        let status = response.status();
        if status.is_redirection() {
            match response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                Some(location) => return Some(location.to_string()),
                None => {
                    warn!(
                        url = %url,
                        status = status.as_u16(),
                        "cannot resolve a redirection: redirect response without Location header"
                    );
                    return None;
                }
            }
        }

        warn!(
            url = %url,
            status = status.as_u16(),
            "cannot resolve a redirection: received a non-redirection HTTP code"
        );
        None
    }

    /// Gathers descriptors from a located share: one descriptor for a
    /// shared file, a full crawl for a shared directory.
    async fn gather_from_share(&self, share_url: &Url) -> Option<Vec<FileDescriptor>> {
        let host = share_url.host_str()?;
        let domain = match share_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let share_id = share_url.path_segments()?.next_back()?.to_string();

        let api = match ShareApi::new(share_url.scheme(), &domain) {
            Ok(api) => Arc::new(api),
            Err(build_error) => {
                warn!(domain = %domain, error = %build_error, "could not build share API client");
                return None;
            }
        };

        let root = match api.share_public(&share_id).await {
            Ok(root) => root,
            Err(api_error) => {
                warn!(share_id = %share_id, error = %api_error, "failed to fetch share descriptor");
                return None;
            }
        };

        match root.file_type.as_str() {
            "REG" => {
                let attributes = match api.file_attributes(&root.root_file_id).await {
                    Ok(attributes) => attributes,
                    Err(api_error) => {
                        warn!(
                            file_id = %root.root_file_id,
                            error = %api_error,
                            "failed to fetch shared file attributes"
                        );
                        return None;
                    }
                };
                Some(vec![build_descriptor(
                    &api,
                    &root.space_id,
                    &attributes.file_id,
                    attributes.name,
                    attributes.size,
                )])
            }
            "DIR" => Some(
                crawl::crawl_directory(api, root.space_id, root.root_file_id, self.workers).await,
            ),
            unexpected => {
                error!(file_type = %unexpected, "unexpected share fileType");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn resolver() -> ShareResolver {
        ShareResolver::new().unwrap()
    }

    #[test]
    fn test_identifier_to_url_passes_urls_through() {
        let r = resolver();
        assert_eq!(
            r.identifier_to_url("https://example.org/record/1").as_deref(),
            Some("https://example.org/record/1")
        );
        assert_eq!(
            r.identifier_to_url("HTTP://example.org/x").as_deref(),
            Some("HTTP://example.org/x")
        );
    }

    #[test]
    fn test_identifier_to_url_prefixes_dois() {
        let r = resolver();
        assert_eq!(
            r.identifier_to_url("10.1234/abc-DEF").as_deref(),
            Some("https://doi.org/10.1234/abc-DEF")
        );
    }

    #[test]
    fn test_identifier_to_url_rejects_other_shapes() {
        let r = resolver();
        assert!(r.identifier_to_url("urn:nbn:de:1234-5678").is_none());
        assert!(r.identifier_to_url("11304/plain-handle").is_none());
        assert!(r.identifier_to_url("10.12/too-short-registrant").is_none());
    }

    #[test]
    fn test_share_link_shape() {
        assert!(SHARE_LINK_SHAPE.is_match("https://demo.example.org/share/abc123XYZ"));
        assert!(SHARE_LINK_SHAPE.is_match("http://127.0.0.1:8080/share/abc"));
        assert!(!SHARE_LINK_SHAPE.is_match("https://demo.example.org/share/abc/extra"));
        assert!(!SHARE_LINK_SHAPE.is_match("https://demo.example.org/shares/abc"));
        assert!(!SHARE_LINK_SHAPE.is_match("ftp://demo.example.org/share/abc"));
    }

    #[test]
    fn test_build_descriptor_carries_provenance() {
        let api = ShareApi::new("https", "demo.example.org").unwrap();
        let descriptor = build_descriptor(&api, "space-1", "file-9", Some("a.txt".into()), Some(10));

        assert_eq!(
            descriptor.link,
            "https://demo.example.org/api/v3/onezone/file-9"
        );
        assert_eq!(descriptor.checksum_type, "md5");
        assert!(descriptor.checksum_value.is_none());
        assert_eq!(descriptor.provenance.domain, "demo.example.org");
        assert_eq!(descriptor.provenance.space_id, "space-1");
        assert!(descriptor.provenance.public_access);
    }
}

use crate::config::FetchConfig;
use crate::model::{ErrorKind, Validators};
use crate::util::{validate_url, UrlValidationError};
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use std::collections::HashSet;
use std::error::Error as _;
use thiserror::Error;
use url::Url;

const FEED_ACCEPT: &str = "application/atom+xml, application/rss+xml, application/rdf+xml;q=0.9, \
     application/feed+json;q=0.9, application/json;q=0.8, application/xml;q=0.8, \
     text/xml;q=0.7, */*;q=0.1";

/// Errors that can occur while retrieving a feed document.
///
/// Every variant maps onto an [`ErrorKind`]; the variant itself carries the
/// detail worth logging.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with a status the fetcher does not accept
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Feed URL or redirect target is unusable
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Redirect without a usable `Location` header
    #[error("Redirect {status} without a valid Location header")]
    BadRedirect { status: u16 },
    /// Redirect chain revisited a URL or ran past the hop limit
    #[error("Redirect loop after {hops} hops")]
    RedirectLoop { hops: usize },
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Classifies the error for the poll record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Client(_) => ErrorKind::Connect,
            FetchError::Network(e) => classify_network_error(e),
            FetchError::HttpStatus(status) => ErrorKind::HttpStatus(*status),
            FetchError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            FetchError::BadRedirect { status } => ErrorKind::HttpStatus(*status),
            FetchError::RedirectLoop { .. } => ErrorKind::RedirectLoop,
            FetchError::ResponseTooLarge => ErrorKind::TooLarge,
            FetchError::IncompleteResponse { .. } => ErrorKind::Connect,
        }
    }
}

/// A successfully retrieved feed body.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// Validators the server sent with this response
    pub validators: Validators,
    /// Set when every redirect hop was permanent
    pub new_url: Option<String>,
    /// URL the body was actually served from, used to resolve relative links
    pub final_url: String,
}

/// What a single fetch attempt produced.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    NotModified {
        validators: Validators,
        new_url: Option<String>,
    },
    Fetched(FetchedDocument),
    PermanentFailure(ErrorKind),
    TransientFailure(ErrorKind),
}

/// HTTP client for feed documents.
///
/// Redirects are followed by hand so permanent moves can be told apart from
/// temporary ones and every hop can be checked against the address policy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, config })
    }

    /// Fetches `url`, sending the cached validators as conditional headers.
    ///
    /// Never returns an error: failures are classified into
    /// [`FetchOutcome::PermanentFailure`] (404, 410, unusable URL) or
    /// [`FetchOutcome::TransientFailure`] (everything else).
    pub async fn fetch(&self, url: &str, validators: &Validators) -> FetchOutcome {
        match self.fetch_inner(url, validators).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let kind = e.kind();
                tracing::debug!(url = %url, error = %e, kind = %kind, "Feed fetch failed");
                if kind.is_permanent() {
                    FetchOutcome::PermanentFailure(kind)
                } else {
                    FetchOutcome::TransientFailure(kind)
                }
            }
        }
    }

    async fn fetch_inner(
        &self,
        url: &str,
        validators: &Validators,
    ) -> Result<FetchOutcome, FetchError> {
        let start = self.check_target(url)?;
        let mut current = start.clone();
        let mut visited: HashSet<String> = HashSet::from([current.to_string()]);
        let mut all_permanent = true;
        let mut hops = 0;

        let response = loop {
            let response = self
                .client
                .get(current.clone())
                .headers(conditional_headers(validators))
                .send()
                .await?;

            let status = response.status();
            if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
                break response;
            }

            hops += 1;
            if hops > self.config.max_redirects {
                return Err(FetchError::RedirectLoop { hops });
            }

            let next = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| current.join(location.trim()).ok())
                .ok_or(FetchError::BadRedirect {
                    status: status.as_u16(),
                })?;
            let next = self.check_target(next.as_str())?;

            if !matches!(
                status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::PERMANENT_REDIRECT
            ) {
                all_permanent = false;
            }
            if !visited.insert(next.to_string()) {
                return Err(FetchError::RedirectLoop { hops });
            }

            tracing::debug!(
                from = %current,
                to = %next,
                status = status.as_u16(),
                "Following redirect"
            );
            current = next;
        };

        let new_url = (all_permanent && current != start).then(|| current.to_string());
        let status = response.status();
        let fresh = response_validators(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified {
                validators: fresh,
                new_url,
            });
        }
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = read_limited_bytes(response, self.config.max_body_bytes).await?;

        Ok(FetchOutcome::Fetched(FetchedDocument {
            bytes,
            content_type,
            validators: fresh,
            new_url,
            final_url: current.to_string(),
        }))
    }

    fn check_target(&self, url: &str) -> Result<Url, FetchError> {
        if self.config.allow_private_addresses {
            let parsed = Url::parse(url.trim()).map_err(UrlValidationError::from)?;
            return match parsed.scheme() {
                "http" | "https" => Ok(parsed),
                other => Err(UrlValidationError::UnsupportedScheme(other.to_string()).into()),
            };
        }
        Ok(validate_url(url)?)
    }
}

fn conditional_headers(validators: &Validators) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(FEED_ACCEPT));
    if let Some(etag) = validators
        .etag
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::IF_NONE_MATCH, etag);
    }
    if let Some(modified) = validators
        .last_modified
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::IF_MODIFIED_SINCE, modified);
    }
    headers
}

fn response_validators(headers: &HeaderMap) -> Validators {
    let value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    Validators {
        etag: value(header::ETAG),
        last_modified: value(header::LAST_MODIFIED),
    }
}

/// Maps a transport error onto the coarse kinds recorded for a feed.
///
/// reqwest only exposes timeout/connect predicates, so DNS and TLS failures
/// are recognised from the source chain.
fn classify_network_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }

    let mut chain = String::new();
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push_str(&inner.to_string().to_ascii_lowercase());
        chain.push(' ');
        source = inner.source();
    }

    if chain.contains("timed out") {
        ErrorKind::Timeout
    } else if chain.contains("dns")
        || chain.contains("resolve")
        || chain.contains("lookup")
        || chain.contains("no record")
    {
        ErrorKind::Dns
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake")
    {
        ErrorKind::Tls
    } else if err.is_redirect() {
        ErrorKind::RedirectLoop
    } else {
        ErrorKind::Connect
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::header::{HeaderValue, LOCATION, USER_AGENT};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::DownloadConfig;
use crate::error::DownloadError;

pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

const CLIENT_USER_AGENT: &str = concat!("video-feed-engine/", env!("CARGO_PKG_VERSION"));

/// Source of media bytes. The engine only ever needs "give me the body of
/// this URL as a stream"; transports plug in behind this trait.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError>;
}

/// Plain-HTTP fetcher on the hyper client, with a connection cap, response
/// timeout, bounded redirects and backoff retries on transient failures.
pub struct HttpFetcher {
    client: Client<HttpConnector, Empty<Bytes>>,
    semaphore: Arc<Semaphore>,
    config: DownloadConfig,
}

impl HttpFetcher {
    pub fn new(config: DownloadConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        let semaphore = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            client,
            semaphore,
            config,
        }
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<Response<Incoming>, DownloadError> {
        let mut current_retry = 0;

        loop {
            if current_retry > 0 {
                let delay = self.config.retry_delay * 2_u32.saturating_pow(current_retry - 1);
                tokio::time::sleep(delay).await;
                debug!(url = %url, attempt = current_retry, max = self.config.max_retries, "Retrying request");
            }

            match self.fetch_following_redirects(url).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && current_retry < self.config.max_retries => {
                    warn!(url = %url, error = %err, "Transient download failure");
                    current_retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_following_redirects(&self, url: &Url) -> Result<Response<Incoming>, DownloadError> {
        let mut current = url.clone();

        for _ in 0..=self.config.max_redirects {
            let response = self.send(&current).await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if is_followable(status) {
                current = redirect_target(&current, &response)?;
                debug!(from = %url, to = %current, "Following redirect");
                continue;
            }
            return Err(DownloadError::HttpStatus {
                status,
                url: current.to_string(),
            });
        }

        Err(DownloadError::TooManyRedirects {
            url: url.to_string(),
        })
    }

    async fn send(&self, url: &Url) -> Result<Response<Incoming>, DownloadError> {
        check_scheme(url)?;
        let req = Request::get(url.as_str())
            .header(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT))
            .body(Empty::<Bytes>::new())
            .map_err(|err| DownloadError::InvalidUrl {
                input: url.to_string(),
                reason: err.to_string(),
            })?;

        match timeout(self.config.request_timeout, self.client.request(req)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(DownloadError::network(url.as_str(), err)),
            Err(_) => Err(DownloadError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, DownloadError> {
        let parsed = parse_url(url)?;
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::Cancelled)?;

        let response = self.fetch_with_retry(&parsed).await?;
        let source = url.to_owned();
        let body = response
            .into_body()
            .into_data_stream()
            .map(move |chunk| {
                // The permit lives as long as the body is being read.
                let _held = &permit;
                chunk.map_err(|err| DownloadError::network(source.as_str(), err))
            });
        Ok(body.boxed())
    }
}

fn parse_url(input: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(input).map_err(|err| DownloadError::InvalidUrl {
        input: input.to_owned(),
        reason: err.to_string(),
    })?;
    check_scheme(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<(), DownloadError> {
    if url.scheme() == "http" {
        Ok(())
    } else {
        Err(DownloadError::UnsupportedScheme {
            scheme: url.scheme().to_owned(),
            url: url.to_string(),
        })
    }
}

fn redirect_target(current: &Url, response: &Response<Incoming>) -> Result<Url, DownloadError> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| DownloadError::HttpStatus {
            status: response.status(),
            url: current.to_string(),
        })?;
    current.join(location).map_err(|err| DownloadError::InvalidUrl {
        input: location.to_owned(),
        reason: err.to_string(),
    })
}

fn is_followable(status: StatusCode) -> bool {
    status.is_redirection() && status != StatusCode::NOT_MODIFIED
}

use std::{future::Future, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::{
    error::{MirrorError, MirrorResult},
    util::http::HttpClient,
};

/// A successful response body.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Source of remote resources.
///
/// A fetcher performs exactly one attempt per call. Retries and error annotation
/// are layered on top by the walker and the materializer.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = MirrorResult<Fetched>> + Send;
}

impl<F> Fetcher for Arc<F>
where
    F: Fetcher,
{
    fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = MirrorResult<Fetched>> + Send {
        self.as_ref().fetch(url, timeout)
    }
}

impl Fetcher for HttpClient {
    fn fetch(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> impl Future<Output = MirrorResult<Fetched>> + Send {
        let request = self.get(url.clone()).timeout(timeout);
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(MirrorError::HttpError(status));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?;
            Ok(Fetched { content_type, body })
        }
    }
}

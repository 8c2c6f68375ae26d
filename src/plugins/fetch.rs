//! Downloading plugin path entries.
//!
//! [`Fetch`] is the seam the plugin path resolver downloads through. The
//! production implementation is [`DownloadClient`], a blocking `reqwest`
//! client whose requests are decorated by every [`ConnectionHandler`]
//! plugin in the registry (credentials, proxies, signing).

use anyhow::Context;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::LAST_MODIFIED;
use reqwest::Url;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::DownloadSettings;

use super::traits::Closeable;

/// Body of a fetched URL plus its metadata.
pub struct Resource {
    reader: Box<dyn Read + Send>,
    length: Option<u64>,
    last_modified: Option<SystemTime>,
}

impl Resource {
    pub fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            length: None,
            last_modified: None,
        }
    }

    pub fn with_length(mut self, length: Option<u64>) -> Self {
        self.length = length;
        self
    }

    pub fn with_last_modified(mut self, last_modified: Option<SystemTime>) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Copy the whole body into `out`.
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W) -> std::io::Result<u64> {
        std::io::copy(&mut self.reader, out)
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("length", &self.length)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Downloads URLs for the plugin path resolver.
pub trait Fetch: Closeable {
    fn fetch(&self, url: &Url) -> anyhow::Result<Resource>;
}

/// A plugin that decorates outgoing download requests.
pub trait ConnectionHandler: Send + Sync {
    /// Whether this handler applies to `url`.
    fn matches(&self, _url: &Url) -> bool {
        true
    }

    fn handle(&self, request: RequestBuilder) -> anyhow::Result<RequestBuilder>;
}

/// Blocking HTTP client used to download plugin path entries.
pub struct DownloadClient {
    client: Client,
    handlers: Vec<Arc<dyn ConnectionHandler>>,
}

impl DownloadClient {
    pub fn new(
        settings: &DownloadSettings,
        handlers: Vec<Arc<dyn ConnectionHandler>>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str())
            .build()
            .context("failed to build download client")?;
        Ok(Self { client, handlers })
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl Fetch for DownloadClient {
    fn fetch(&self, url: &Url) -> anyhow::Result<Resource> {
        let mut request = self.client.get(url.clone());
        for handler in self.handlers.iter().filter(|h| h.matches(url)) {
            request = handler.handle(request)?;
        }

        let response = request
            .send()
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?;

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);
        let length = response.content_length();

        Ok(Resource::new(Box::new(response))
            .with_length(length)
            .with_last_modified(last_modified))
    }
}

impl Closeable for DownloadClient {
    fn close(&self) -> anyhow::Result<()> {
        tracing::debug!("Closing plugin download client");
        Ok(())
    }
}

impl std::fmt::Debug for DownloadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadClient")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// Parse an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Bearer;

    impl ConnectionHandler for Bearer {
        fn matches(&self, url: &Url) -> bool {
            url.path().starts_with("/plugins/")
        }

        fn handle(&self, request: RequestBuilder) -> anyhow::Result<RequestBuilder> {
            Ok(request.bearer_auth("secret"))
        }
    }

    #[test]
    fn parses_http_dates() {
        let parsed = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(
            parsed,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_445_412_480)
        );
        assert!(parse_http_date("yesterday").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_applies_matching_handlers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins/acme.jar"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"jar-bytes".to_vec())
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/plugins/acme.jar", server.uri())).unwrap();
        let (body, last_modified) = tokio::task::spawn_blocking(move || {
            let handlers: Vec<Arc<dyn ConnectionHandler>> = vec![Arc::new(Bearer)];
            let client = DownloadClient::new(&DownloadSettings::default(), handlers).unwrap();
            let mut resource = client.fetch(&url).unwrap();
            let mut body = Vec::new();
            resource.write_to(&mut body).unwrap();
            (body, resource.last_modified())
        })
        .await
        .unwrap();

        assert_eq!(body, b"jar-bytes");
        assert_eq!(last_modified, parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.jar", server.uri())).unwrap();
        let result = tokio::task::spawn_blocking(move || {
            let client = DownloadClient::new(&DownloadSettings::default(), Vec::new()).unwrap();
            client.fetch(&url).map(|_| ())
        })
        .await
        .unwrap();

        assert!(result.unwrap_err().to_string().contains("404"));
    }
}

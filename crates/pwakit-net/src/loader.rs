//! `reqwest`-backed [`Fetcher`].

use std::time::Duration;

use futures::future::BoxFuture;
use http::header;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{Fetcher, NetError, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Per-request timeout, `None` leaves stalls to the transport.
    pub default_timeout: Option<Duration>,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("PwaKit/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: None,
            max_redirects: 10,
        }
    }
}

/// Resource loader for fetching URLs.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects));
        if let Some(timeout) = config.default_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Fetch a request from the network.
    pub async fn load(&self, request: &Request) -> Result<Response, NetError> {
        debug!(
            request_id = request.id.raw(),
            url = %request.url,
            method = %request.method,
            destination = %request.destination,
            "Fetching resource"
        );

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        if !request.headers.contains_key(header::ACCEPT_LANGUAGE) {
            req_builder = req_builder.header(header::ACCEPT_LANGUAGE, &self.config.accept_language);
        }
        if let Some(ref body) = request.body {
            req_builder = req_builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            req_builder = req_builder.timeout(timeout);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_connect() {
                NetError::Offline(e.to_string())
            } else {
                NetError::Http(e)
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let redirected = url != request.url;
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            redirected,
            body_len = body.len(),
            "Response received"
        );

        let mut response = Response::new(url, status, headers, body);
        response.redirected = redirected;
        Ok(response)
    }
}

impl Fetcher for ResourceLoader {
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>> {
        Box::pin(self.load(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Destination;
    use http::StatusCode;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader() -> ResourceLoader {
        ResourceLoader::new(LoaderConfig::default()).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("PwaKit/"));
        assert_eq!(config.max_redirects, 10);
        assert!(config.default_timeout.is_none());
    }

    #[tokio::test]
    async fn test_load_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/script.js"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("console.log(1)", "application/javascript"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/script.js", server.uri())).unwrap();
        let request = Request::get(url).with_destination(Destination::Script);
        let response = loader().fetch(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert!(response.is_cacheable());
        assert!(!response.from_cache);
        assert_eq!(response.content_type(), Some(mime::APPLICATION_JAVASCRIPT));
        assert_eq!(response.text().unwrap(), "console.log(1)");
    }

    #[tokio::test]
    async fn test_load_not_found_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();
        let response = loader().load(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(!response.is_cacheable());
    }

    #[tokio::test]
    async fn test_load_marks_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old.css"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", format!("{}/new.css", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body {}"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/old.css", server.uri())).unwrap();
        let response = loader().load(&Request::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert!(response.redirected);
        assert!(!response.is_cacheable());
    }

    #[tokio::test]
    async fn test_load_unreachable_host() {
        let url = Url::parse("http://127.0.0.1:1/index.html").unwrap();
        let result = loader().load(&Request::navigate(url)).await;
        assert!(result.is_err());
    }
}

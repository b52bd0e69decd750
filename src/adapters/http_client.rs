use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use http::{HeaderValue, Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;

use crate::{
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    tracing_setup::create_backend_span,
};

const USER_AGENT: &str = concat!("topogate/", env!("CARGO_PKG_VERSION"));

/// Backend client built on the hyper legacy client with rustls.
///
/// * Sets `Host` from the target URI and a default `User-Agent`
/// * Sends HTTP/1.1 and lets ALPN negotiate h2 for TLS backends
/// * Bounds every exchange with a request timeout
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        Ok(Self {
            client,
            request_timeout,
        })
    }

    fn prepare(req: &mut Request<Body>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "backend URI has no host: {}",
                req.uri()
            )));
        };
        let host = match req.uri().port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        }
        // framing is renegotiated for the backend hop
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONNECTION);
        *req.version_mut() = Version::HTTP_11;
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, mut req: Request<Body>) -> HttpClientResult<Response<Body>> {
        Self::prepare(&mut req)?;
        let url = req.uri().to_string();

        let span = create_backend_span(&url, req.method().as_str());

        let millis = self.request_timeout.as_millis() as u64;
        let exchange =
            timeout(self.request_timeout, self.client.request(req)).instrument(span.clone());
        let response = match exchange.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                span.record("http.status_code", 599u16);
                tracing::error!("Error forwarding to {}: {}", url, e);
                return Err(HttpClientError::Connection {
                    url,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                span.record("http.status_code", 504u16);
                return Err(HttpClientError::Timeout { url, millis });
            }
        };

        span.record("http.status_code", response.status().as_u16());
        let (mut parts, body) = response.into_parts();
        parts.headers.remove(header::TRANSFER_ENCODING);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

use std::time::Duration;

use async_trait::async_trait;
use axum::{BoxError, body::Body as AxumBody};
use eyre::Result;
use futures_util::{StreamExt, stream};
use http_body_util::{BodyStream, StreamBody};
use hyper::{Request, Response, Version, body::Incoming, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// Connections are pooled per backend origin by the legacy hyper-util client.
/// The response head must arrive within `request_timeout`, and so must every
/// subsequent body frame; a backend that goes quiet mid-body has its
/// response aborted.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!(timeout = ?request_timeout, "Created backend HTTP client");
        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Point the `Host` header at the backend authority.
    fn set_host_header(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        };
        let value = match req.uri().port_u16() {
            Some(port) => HeaderValue::from_str(&format!("{host}:{port}")),
            None => HeaderValue::from_str(host),
        }
        .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

/// Stream `body` through, failing it if no frame arrives within `idle`.
fn with_idle_timeout(body: Incoming, idle: Duration) -> AxumBody {
    let frames = stream::unfold(Some(BodyStream::new(body)), move |state| async move {
        let mut frames = state?;
        match timeout(idle, frames.next()).await {
            Ok(Some(Ok(frame))) => Some((Ok(frame), Some(frames))),
            Ok(Some(Err(e))) => Some((Err(BoxError::from(e)), None)),
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(idle = ?idle, "Backend stalled while streaming the response body");
                Some((
                    Err(BoxError::from(format!(
                        "backend sent no data for {idle:?}"
                    ))),
                    None,
                ))
            }
        }
    });
    AxumBody::new(StreamBody::new(frames))
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        Self::set_host_header(&mut req)?;

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();

        tracing::debug!(%method, %uri, "Sending request to backend");

        match timeout(
            self.request_timeout,
            self.client.request(Request::from_parts(parts, body)),
        )
        .await
        {
            Ok(Ok(response)) => {
                let (mut parts, hyper_body) = response.into_parts();

                // The body is re-framed by the downstream server
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(
                    parts,
                    with_idle_timeout(hyper_body, self.request_timeout),
                ))
            }
            Ok(Err(e)) => {
                tracing::warn!(%method, %uri, error = %e, "Backend request failed");
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(%method, %uri, timeout = ?self.request_timeout, "Backend request timed out");
                Err(HttpClientError::Timeout(self.request_timeout))
            }
        }
    }
}

//! HTTP client for the SDN controller.
//!
//! One HTTP/1.1 connection per request, over TLS for `https` URLs, with basic
//! auth and a fixed timeout covering connect, handshake, request and body.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use fabric_core::config::SdnConfig;
use fabric_core::FabricMapping;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, LOCATION, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use rustls::pki_types::ServerName;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{SdnError, SdnResult};
use crate::tls;
use crate::types::{NetworkRequest, RegisterResponse, TransactionStatus};

pub const BASE_ENDPOINT: &str = "network/v1.0/";

/// Default request timeout.
pub const SDN_TIMEOUT: Duration = Duration::from_secs(10);

struct SdnResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Debug, Clone)]
struct TlsTarget {
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
}

#[derive(Debug, Clone)]
pub struct SdnClient {
    /// `host:port` to connect to.
    authority: String,
    /// Absolute path of [`BASE_ENDPOINT`], with leading and trailing `/`.
    base_path: String,
    auth_header: String,
    timeout: Duration,
    /// Set for `https` URLs.
    tls: Option<TlsTarget>,
}

impl SdnClient {
    /// Client for `url`. `https` URLs verify the controller against the
    /// Mozilla root store.
    pub fn new(url: &str, username: &str, password: &str, timeout: Duration) -> SdnResult<Self> {
        Self::with_cert_path(url, username, password, timeout, None)
    }

    /// Client for `url` with explicit certificate verification, see
    /// [`tls::client_config`]. `cert_path` is ignored for `http` URLs.
    pub fn with_cert_path(
        url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
        cert_path: Option<&str>,
    ) -> SdnResult<Self> {
        let invalid = |reason: &str| SdnError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        let (secure, default_port) = match uri.scheme_str() {
            Some("http") => (false, 80),
            Some("https") => (true, 443),
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        };
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let host = authority.host();
        let port = authority.port_u16().unwrap_or(default_port);

        let tls = if secure {
            let name = host.trim_start_matches('[').trim_end_matches(']');
            let server_name = ServerName::try_from(name)
                .map_err(|e| invalid(&e.to_string()))?
                .to_owned();
            Some(TlsTarget {
                config: tls::client_config(cert_path)?,
                server_name,
            })
        } else {
            None
        };
        let authority = format!("{host}:{port}");

        let prefix = uri.path().trim_end_matches('/');
        let base_path = format!("{prefix}/{BASE_ENDPOINT}");

        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{password}"));

        Ok(Self {
            authority,
            base_path,
            auth_header: format!("Basic {credentials}"),
            timeout,
            tls,
        })
    }

    pub fn from_config(config: &SdnConfig) -> SdnResult<Self> {
        Self::with_cert_path(
            &config.url,
            &config.username,
            &config.password,
            Duration::from_secs(config.timeout_secs),
            config.cert_path.as_deref(),
        )
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// Absolute request path of an endpoint relative to [`BASE_ENDPOINT`].
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_path, path)
    }

    /// Register this deployment and return the id the controller assigned.
    pub async fn register(&self) -> SdnResult<String> {
        let resp = self
            .request::<()>(Method::POST, "register", None, StatusCode::OK)
            .await?;
        let body: RegisterResponse =
            serde_json::from_slice(&resp.body).map_err(|e| SdnError::Decode(e.to_string()))?;
        debug!(openstack_id = %body.openstack_id, "registered with SDN controller");
        Ok(body.openstack_id)
    }

    /// Provision `mapping`. Returns the transaction id.
    pub async fn create_network(
        &self,
        openstack_id: &str,
        mapping: &FabricMapping,
    ) -> SdnResult<String> {
        let body = NetworkRequest::from(mapping);
        let resp = self
            .request(Method::POST, openstack_id, Some(&body), StatusCode::ACCEPTED)
            .await?;
        Ok(transaction_id(&resp.headers))
    }

    /// Retire `mapping`. Returns the transaction id.
    pub async fn delete_network(
        &self,
        openstack_id: &str,
        mapping: &FabricMapping,
    ) -> SdnResult<String> {
        let body = NetworkRequest::from(mapping);
        let resp = self
            .request(Method::DELETE, openstack_id, Some(&body), StatusCode::ACCEPTED)
            .await?;
        Ok(transaction_id(&resp.headers))
    }

    /// The subset of `tx_ids` the controller reports as completed.
    pub async fn transaction_status(
        &self,
        openstack_id: &str,
        tx_ids: &[String],
    ) -> SdnResult<HashSet<String>> {
        if tx_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let path = format!("transaction/{openstack_id}/{}", tx_ids.join(","));
        let resp = self
            .request::<()>(Method::GET, &path, None, StatusCode::OK)
            .await?;
        let statuses: Vec<TransactionStatus> =
            serde_json::from_slice(&resp.body).map_err(|e| SdnError::Decode(e.to_string()))?;
        Ok(statuses
            .into_iter()
            .filter(TransactionStatus::is_completed)
            .map(|s| s.transaction_id)
            .collect())
    }

    async fn request<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        expected: StatusCode,
    ) -> SdnResult<SdnResponse> {
        let uri = self.endpoint(path);
        let payload = match body {
            Some(body) => Some(serde_json::to_vec(body).map_err(|e| SdnError::Http(e.to_string()))?),
            None => None,
        };

        let resp = tokio::time::timeout(self.timeout, self.send(&method, &uri, payload))
            .await
            .map_err(|_| SdnError::Timeout(self.timeout))??;

        debug!(
            %method,
            %uri,
            status = %resp.status,
            location = ?resp.headers.get(LOCATION),
            body = %String::from_utf8_lossy(&resp.body),
            "SDN request"
        );

        if resp.status != expected {
            return Err(SdnError::Status {
                method: method.to_string(),
                url: uri,
                status: resp.status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn send(
        &self,
        method: &Method,
        uri: &str,
        payload: Option<Vec<u8>>,
    ) -> SdnResult<SdnResponse> {
        let req = self.build_request(method, uri, payload)?;
        let stream = tokio::net::TcpStream::connect(&self.authority)
            .await
            .map_err(|e| SdnError::Connect(format!("{}: {e}", self.authority)))?;

        match &self.tls {
            None => exchange(stream, req).await,
            Some(tls) => {
                let stream = tokio_rustls::TlsConnector::from(tls.config.clone())
                    .connect(tls.server_name.clone(), stream)
                    .await
                    .map_err(|e| SdnError::Tls(format!("{}: {e}", self.authority)))?;
                exchange(stream, req).await
            }
        }
    }

    fn build_request(
        &self,
        method: &Method,
        uri: &str,
        payload: Option<Vec<u8>>,
    ) -> SdnResult<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(HOST, &self.authority)
            .header(AUTHORIZATION, &self.auth_header)
            .header(USER_AGENT, "fabricmap/0.1");
        let body = match payload {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        builder.body(body).map_err(|e| SdnError::Http(e.to_string()))
    }
}

async fn exchange<S>(stream: S, req: Request<Full<Bytes>>) -> SdnResult<SdnResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| SdnError::Http(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "SDN connection closed with error");
        }
    });

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| SdnError::Http(e.to_string()))?;
    let (parts, body) = resp.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| SdnError::Http(e.to_string()))?
        .to_bytes();

    Ok(SdnResponse {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// Last path segment of the `Location` header, or empty when absent.
fn transaction_id(headers: &HeaderMap) -> String {
    headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| location.rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

//! Member cluster API client.
//!
//! Two call shapes are needed: an authenticated discovery call used as
//! the reachability probe (`GET /version`) and a node listing used for
//! zone/region inventory (`GET /api/v1/nodes`). Callers bound every call
//! with their own timeout; the client itself never retries.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http::header::{ACCEPT, AUTHORIZATION, HOST, USER_AGENT};
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::debug;

use fedcluster_state::ClusterSpec;

/// Boxed future returned by [`ClusterClient`] calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Labels of a single member cluster node.
pub type NodeLabels = BTreeMap<String, String>;

/// Everything needed to talk to one member cluster.
#[derive(Clone)]
pub struct ProbeTarget {
    pub endpoint: String,
    pub ca_bundle: Option<Vec<u8>>,
    pub token: String,
}

impl ProbeTarget {
    pub fn new(spec: &ClusterSpec, token: String) -> Self {
        Self {
            endpoint: spec.api_endpoint.clone(),
            ca_bundle: spec.ca_bundle.clone(),
            token,
        }
    }
}

impl fmt::Debug for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeTarget")
            .field("endpoint", &self.endpoint)
            .field("ca_bundle", &self.ca_bundle.as_ref().map(Vec::len))
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Failure of a single call against a member cluster.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("invalid endpoint {0:?}")]
    Endpoint(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("certificate verification failed: {0}")]
    Certificate(String),

    #[error("credentials rejected with HTTP {0}")]
    Unauthorized(u16),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("invalid response: {0}")]
    Protocol(String),
}

/// The calls the health subsystem makes against a member cluster.
pub trait ClusterClient: Send + Sync {
    /// Minimal authenticated discovery call.
    fn discover<'a>(&'a self, target: &'a ProbeTarget) -> BoxFuture<'a, Result<(), CallError>>;

    /// Labels of every node in the cluster.
    fn list_nodes<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> BoxFuture<'a, Result<Vec<NodeLabels>, CallError>>;
}

// ── HTTP implementation ───────────────────────────────────────────

/// [`ClusterClient`] speaking HTTP/1.1, over TLS unless the endpoint says
/// `http://`.
#[derive(Debug, Clone, Default)]
pub struct HttpClusterClient;

impl HttpClusterClient {
    pub fn new() -> Self {
        Self
    }

    async fn get(&self, target: &ProbeTarget, path: &str) -> Result<Bytes, CallError> {
        let endpoint = Endpoint::parse(&target.endpoint)?;
        let authority = endpoint.authority();

        let request = http::Request::builder()
            .method("GET")
            .uri(path)
            .header(HOST, authority.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", target.token))
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, "fedcluster-health/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| CallError::Protocol(e.to_string()))?;

        let tcp = TcpStream::connect(authority.as_str())
            .await
            .map_err(|e| CallError::Connect(format!("{authority}: {e}")))?;

        if !endpoint.tls {
            return send(tcp, request).await;
        }

        let config = tls_config(target.ca_bundle.as_deref())?;
        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| CallError::Endpoint(format!("{}: {e}", endpoint.host)))?;
        let stream = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(classify_tls_error)?;
        send(stream, request).await
    }
}

impl ClusterClient for HttpClusterClient {
    fn discover<'a>(&'a self, target: &'a ProbeTarget) -> BoxFuture<'a, Result<(), CallError>> {
        Box::pin(async move {
            let body = self.get(target, "/version").await?;
            if let Ok(version) = serde_json::from_slice::<VersionInfo>(&body) {
                debug!(endpoint = %target.endpoint, version = %version.git_version, "cluster discovered");
            }
            Ok(())
        })
    }

    fn list_nodes<'a>(
        &'a self,
        target: &'a ProbeTarget,
    ) -> BoxFuture<'a, Result<Vec<NodeLabels>, CallError>> {
        Box::pin(async move {
            let body = self.get(target, "/api/v1/nodes").await?;
            let list: NodeList =
                serde_json::from_slice(&body).map_err(|e| CallError::Protocol(e.to_string()))?;
            Ok(list
                .items
                .into_iter()
                .map(|node| node.metadata.labels)
                .collect())
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    #[serde(default)]
    git_version: String,
}

#[derive(Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<Node>,
}

#[derive(Deserialize)]
struct Node {
    #[serde(default)]
    metadata: NodeMeta,
}

#[derive(Deserialize, Default)]
struct NodeMeta {
    #[serde(default)]
    labels: NodeLabels,
}

/// Aborts the connection driver when the call is dropped, so a cancelled
/// probe does not leave a socket behind.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn send<S>(stream: S, request: http::Request<Empty<Bytes>>) -> Result<Bytes, CallError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| CallError::Connect(e.to_string()))?;

    let _driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "cluster connection closed with error");
        }
    }));

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| CallError::Connect(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(CallError::Unauthorized(status.as_u16()));
    }
    if !status.is_success() {
        return Err(CallError::Status(status.as_u16()));
    }

    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| CallError::Protocol(e.to_string()))?
        .to_bytes();
    Ok(body)
}

/// Build a client TLS config trusting either the cluster's CA bundle or,
/// without one, the Mozilla root store.
fn tls_config(ca_bundle: Option<&[u8]>) -> Result<Arc<rustls::ClientConfig>, CallError> {
    let mut roots = rustls::RootCertStore::empty();
    match ca_bundle {
        Some(pem) => {
            let certs = rustls_pemfile::certs(&mut &pem[..])
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CallError::Certificate(format!("invalid caBundle: {e}")))?;
            let (added, _) = roots.add_parsable_certificates(certs);
            if added == 0 {
                return Err(CallError::Certificate(
                    "caBundle contains no usable certificates".to_string(),
                ));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let mut config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| CallError::Protocol(format!("tls protocol versions: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Separate trust failures from plain connection failures so operators
/// can tell a rotated CA from a cluster that is down.
fn classify_tls_error(err: std::io::Error) -> CallError {
    let trust_failure = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|e| {
            matches!(
                e,
                rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented
            )
        });
    if trust_failure {
        CallError::Certificate(err.to_string())
    } else {
        CallError::Connect(err.to_string())
    }
}

/// A parsed `apiEndpoint`.
#[derive(Debug, PartialEq, Eq)]
struct Endpoint {
    tls: bool,
    host: String,
    port: u16,
}

impl Endpoint {
    fn parse(raw: &str) -> Result<Self, CallError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let (tls, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            (false, rest)
        } else {
            (true, trimmed)
        };
        if rest.is_empty() || rest.contains('/') || rest.contains('@') {
            return Err(CallError::Endpoint(raw.to_string()));
        }

        let default_port = if tls { 443 } else { 80 };
        let parse_port =
            |p: &str| p.parse::<u16>().map_err(|_| CallError::Endpoint(raw.to_string()));

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            // [v6]:port or [v6]
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| CallError::Endpoint(raw.to_string()))?;
            match tail.strip_prefix(':') {
                Some(p) => (host, parse_port(p)?),
                None if tail.is_empty() => (host, default_port),
                None => return Err(CallError::Endpoint(raw.to_string())),
            }
        } else {
            match rest.rsplit_once(':') {
                // A second colon means a bare IPv6 address without a port.
                Some((host, p)) if !host.contains(':') => (host, parse_port(p)?),
                _ => (rest, default_port),
            }
        };
        if host.is_empty() {
            return Err(CallError::Endpoint(raw.to_string()));
        }

        Ok(Self {
            tls,
            host: host.to_string(),
            port,
        })
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

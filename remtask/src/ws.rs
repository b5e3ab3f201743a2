//! WebSocket transport to a remtask agent. Serves as both the inventory fetcher and
//! the action executor. One connection is cached per target and dropped on any error.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{
    connect_async, connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

use crate::error::{ActionError, FetchError};
use crate::fetcher::{Action, ActionExecutor, InventoryFetcher};
use crate::types::{PerformanceSummary, ProcessHandle, ProcessInfo};
use crate::wire::{ErrorCode, Request, Response, WireProcess};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct WsOptions {
    pub tls_ca: Option<PathBuf>,
    pub token: Option<String>,
    /// Bound applied to each connect and each request/reply exchange separately.
    /// A whole fetch spans several of these; `SessionConfig::fetch_timeout` caps it.
    pub timeout: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            tls_ca: None,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

type Slot = Arc<Mutex<Option<WsStream>>>;

pub struct WsTransport {
    tls: Option<Arc<rustls::ClientConfig>>,
    token: Option<String>,
    timeout: Duration,
    conns: StdMutex<HashMap<String, Slot>>,
}

impl WsTransport {
    pub fn new(options: WsOptions) -> io::Result<Self> {
        let tls = match options.tls_ca.as_deref() {
            Some(path) => Some(Arc::new(client_tls_config(path)?)),
            None => None,
        };
        Ok(Self {
            tls,
            token: options.token,
            timeout: options.timeout,
            conns: StdMutex::new(HashMap::new()),
        })
    }

    fn slot(&self, key: &str) -> Slot {
        let mut conns = self.conns.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(conns.entry(key.to_string()).or_default())
    }

    async fn open(&self, url: &Url) -> Result<WsStream, FetchError> {
        let connecting = async {
            match &self.tls {
                Some(cfg) if url.scheme() == "wss" => {
                    connect_async_tls_with_config(
                        url.as_str(),
                        None,
                        false,
                        Some(Connector::Rustls(Arc::clone(cfg))),
                    )
                    .await
                }
                _ => connect_async(url.as_str()).await,
            }
        };
        let (ws, _) = timeout(self.timeout, connecting)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
            .map_err(map_ws_error)?;
        debug!(host = %url.host_str().unwrap_or_default(), "connected to agent");
        Ok(ws)
    }

    async fn call(&self, target: &str, req: &Request) -> Result<Response, FetchError> {
        let url = target_url(target, self.token.as_deref())?;
        let slot = self.slot(url.as_str());
        let mut conn = slot.lock().await;
        // Taken out for the exchange: a cancelled or failed call leaves the
        // slot empty, so the next call reconnects.
        let mut ws = match conn.take() {
            Some(ws) => ws,
            None => self.open(&url).await?,
        };
        let res = exchange(&mut ws, req, self.timeout).await;
        if res.is_ok() {
            *conn = Some(ws);
        }
        res
    }
}

impl InventoryFetcher for WsTransport {
    async fn fetch_processes(&self, target: &str) -> Result<Vec<ProcessInfo>, FetchError> {
        match self.call(target, &Request::ListProcesses).await? {
            Response::Processes { processes } => {
                Ok(processes.into_iter().map(into_process_info).collect())
            }
            other => Err(unexpected(other)),
        }
    }

    async fn fetch_performance(&self, target: &str) -> Result<PerformanceSummary, FetchError> {
        match self.call(target, &Request::Performance).await? {
            Response::Performance {
                cpu_percent,
                free_memory_mb,
            } => Ok(PerformanceSummary {
                cpu_percent,
                free_memory_mb,
            }),
            other => Err(unexpected(other)),
        }
    }
}

impl ActionExecutor for WsTransport {
    async fn invoke(&self, handle: &ProcessHandle, action: Action) -> Result<(), ActionError> {
        let req = match action {
            Action::Terminate => Request::Terminate {
                token: handle.token().to_string(),
            },
        };
        match self.call(handle.target(), &req).await? {
            Response::Terminated { .. } => Ok(()),
            Response::Error { message, .. } => Err(ActionError::Remote(message)),
            other => Err(ActionError::Transport(unexpected(other))),
        }
    }
}

/// Normalize a target into an agent URL: `host` and `host:port` get the `ws` scheme
/// and `/ws` path; an auth token is appended as `?token=` unless already present.
pub fn target_url(target: &str, token: Option<&str>) -> Result<Url, FetchError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(FetchError::InvalidTarget("empty target".into()));
    }
    let raw = if target.starts_with("ws://") || target.starts_with("wss://") {
        target.to_string()
    } else if target.contains("://") {
        return Err(FetchError::InvalidTarget(format!(
            "{target}: only ws:// and wss:// are supported"
        )));
    } else {
        let host_port = match target.rsplit_once(':') {
            Some((h, p)) if p.parse::<u16>().is_ok() && (!h.contains(':') || h.starts_with('[')) => {
                target.to_string()
            }
            _ if target.contains(':') && !target.starts_with('[') => {
                format!("[{target}]:{DEFAULT_PORT}")
            }
            _ => format!("{target}:{DEFAULT_PORT}"),
        };
        format!("ws://{host_port}/ws")
    };
    let mut url =
        Url::parse(&raw).map_err(|e| FetchError::InvalidTarget(format!("{target}: {e}")))?;
    if let Some(token) = token {
        if !url.query_pairs().any(|(k, _)| k == "token") {
            url.query_pairs_mut().append_pair("token", token);
        }
    }
    Ok(url)
}

async fn exchange(ws: &mut WsStream, req: &Request, limit: Duration) -> Result<Response, FetchError> {
    let text = serde_json::to_string(req)
        .map_err(|e| FetchError::MalformedResponse(format!("encoding request: {e}")))?;
    let round_trip = async {
        if let Err(e) = ws.send(Message::Text(text)).await {
            return Err(map_ws_error(e));
        }
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(json))) => return decode(json.as_bytes()),
                Some(Ok(Message::Binary(bytes))) => return gunzip(&bytes).and_then(|b| decode(&b)),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(FetchError::HostUnreachable(
                        "connection closed by agent".into(),
                    ))
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(map_ws_error(e)),
            }
        }
    };
    timeout(limit, round_trip)
        .await
        .map_err(|_| FetchError::Timeout(limit))?
}

fn decode(bytes: &[u8]) -> Result<Response, FetchError> {
    serde_json::from_slice(bytes).map_err(|e| FetchError::MalformedResponse(e.to_string()))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| FetchError::MalformedResponse(format!("gzip: {e}")))?;
    Ok(out)
}

fn unexpected(resp: Response) -> FetchError {
    match resp {
        Response::Error {
            code: ErrorCode::Denied,
            message,
        } => FetchError::AuthorizationDenied(message),
        Response::Error { message, .. } => FetchError::MalformedResponse(message),
        other => FetchError::MalformedResponse(format!("unexpected reply: {other:?}")),
    }
}

fn into_process_info(p: WireProcess) -> ProcessInfo {
    ProcessInfo {
        pid: p.pid,
        name: p.name,
        mem_bytes: p.mem_bytes,
        threads: p.threads,
        exe_path: p.exe_path,
        handle: ProcessHandle::new(p.token),
    }
}

fn map_ws_error(e: tungstenite::Error) -> FetchError {
    use tungstenite::Error;
    match e {
        Error::Http(resp) if matches!(resp.status().as_u16(), 401 | 403) => {
            FetchError::AuthorizationDenied(format!("agent refused the connection ({})", resp.status()))
        }
        Error::Http(resp) => {
            FetchError::HostUnreachable(format!("unexpected HTTP status {}", resp.status()))
        }
        Error::Url(e) => FetchError::InvalidTarget(e.to_string()),
        Error::Io(e) => FetchError::HostUnreachable(e.to_string()),
        Error::Protocol(e) => FetchError::MalformedResponse(e.to_string()),
        Error::Utf8 => FetchError::MalformedResponse("invalid UTF-8 in text frame".into()),
        other => FetchError::HostUnreachable(other.to_string()),
    }
}

fn client_tls_config(ca_path: &Path) -> io::Result<rustls::ClientConfig> {
    let mut reader = BufReader::new(File::open(ca_path)?);
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?).map_err(io::Error::other)?;
    }
    if roots.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("no certificates found in {}", ca_path.display()),
        ));
    }
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let cfg = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port_and_path() {
        let u = target_url("server01", None).unwrap();
        assert_eq!(u.as_str(), "ws://server01:3000/ws");
    }

    #[test]
    fn host_port_and_full_urls() {
        assert_eq!(
            target_url("10.0.0.5:9000", None).unwrap().as_str(),
            "ws://10.0.0.5:9000/ws"
        );
        assert_eq!(
            target_url("wss://box.lan:8443/ws", None).unwrap().as_str(),
            "wss://box.lan:8443/ws"
        );
        assert_eq!(
            target_url("::1", None).unwrap().as_str(),
            "ws://[::1]:3000/ws"
        );
    }

    #[test]
    fn token_is_appended_once() {
        let u = target_url("h", Some("s3cret")).unwrap();
        assert_eq!(u.as_str(), "ws://h:3000/ws?token=s3cret");
        let u = target_url("ws://h:1/ws?token=other", Some("s3cret")).unwrap();
        assert_eq!(u.query(), Some("token=other"));
    }

    #[test]
    fn rejects_empty_and_foreign_schemes() {
        assert!(matches!(
            target_url("  ", None),
            Err(FetchError::InvalidTarget(_))
        ));
        assert!(matches!(
            target_url("http://h/ws", None),
            Err(FetchError::InvalidTarget(_))
        ));
    }

    #[test]
    fn denied_reply_maps_to_authorization_error() {
        let js = br#"{"kind":"error","code":"denied","message":"bad token"}"#;
        assert_eq!(
            unexpected(decode(js).unwrap()),
            FetchError::AuthorizationDenied("bad token".into())
        );
    }

    #[test]
    fn gzip_frames_are_inflated() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;
        let js = br#"{"kind":"performance","cpu_percent":3.5,"free_memory_mb":100.0}"#;
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(js).unwrap();
        let bytes = enc.finish().unwrap();
        let resp = decode(&gunzip(&bytes).unwrap()).unwrap();
        assert!(matches!(resp, Response::Performance { cpu_percent, .. } if cpu_percent == 3.5));
    }

    #[tokio::test]
    async fn unreachable_host_is_reported() {
        // Port 9 (discard) on localhost is almost never listening.
        let t = WsTransport::new(WsOptions {
            timeout: Duration::from_secs(2),
            ..WsOptions::default()
        })
        .unwrap();
        let err = t.fetch_processes("127.0.0.1:9").await.unwrap_err();
        assert!(
            matches!(err, FetchError::HostUnreachable(_) | FetchError::Timeout(_)),
            "unexpected error {err:?}"
        );
    }
}

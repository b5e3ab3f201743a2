//! WebSocket upgrade and per-connection request loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
};
use flate2::{write::GzEncoder, Compression};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use crate::inventory::{collect_performance, collect_processes, terminate};
use crate::state::AppState;
use crate::types::{ErrorCode, Request, Response};

/// Replies larger than this go out gzip-compressed in a binary frame.
pub const GZIP_THRESHOLD: usize = 16 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> HttpResponse {
    if let Some(expected) = state.auth_token.as_ref() {
        match q.get("token") {
            Some(t) if t == expected => {}
            _ => {
                warn!("rejected connection with missing or wrong token");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let clients = state.client_count.fetch_add(1, Ordering::Relaxed) + 1;
    info!(clients, "client connected");

    struct ClientGuard(AppState);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            let left = self.0.client_count.fetch_sub(1, Ordering::Relaxed) - 1;
            info!(clients = left, "client disconnected");
        }
    }
    let _guard = ClientGuard(state.clone());

    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Message::Text(text) => {
                let reply = dispatch(&state, &text).await;
                if socket.send(encode(&reply)).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

pub async fn dispatch(state: &AppState, text: &str) -> Response {
    let req = match serde_json::from_str::<Request>(text) {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, "bad request");
            return Response::Error {
                code: ErrorCode::BadRequest,
                message: format!("unrecognized request: {e}"),
            };
        }
    };
    match req {
        Request::ListProcesses => Response::Processes {
            processes: collect_processes(state).await,
        },
        Request::Performance => {
            let (cpu_percent, free_memory_mb) = collect_performance(state).await;
            Response::Performance {
                cpu_percent,
                free_memory_mb,
            }
        }
        Request::Terminate { token } => match terminate(state, &token).await {
            Ok(pid) => Response::Terminated { pid },
            Err(e) => Response::Error {
                code: e.code(),
                message: e.to_string(),
            },
        },
    }
}

pub fn encode(reply: &Response) -> Message {
    let json = match serde_json::to_string(reply) {
        Ok(js) => js,
        Err(e) => {
            warn!(error = %e, "failed to serialize reply");
            return Message::Text(
                r#"{"kind":"error","code":"failed","message":"internal serialization error"}"#
                    .to_string(),
            );
        }
    };
    if json.len() <= GZIP_THRESHOLD {
        return Message::Text(json);
    }
    let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
    match enc.write_all(json.as_bytes()).and_then(|_| enc.finish()) {
        Ok(bytes) => Message::Binary(bytes),
        Err(e) => {
            warn!(error = %e, "gzip failed; sending uncompressed");
            Message::Text(json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProcessInfo;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn procs(n: u32) -> Response {
        Response::Processes {
            processes: (0..n)
                .map(|pid| ProcessInfo {
                    pid,
                    name: format!("worker-{pid}"),
                    mem_bytes: 4096,
                    threads: 2,
                    exe_path: Some("/usr/lib/worker".into()),
                    token: format!("{pid}:1"),
                })
                .collect(),
        }
    }

    #[test]
    fn small_replies_stay_text() {
        match encode(&procs(3)) {
            Message::Text(js) => assert!(js.starts_with(r#"{"kind":"processes""#)),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn large_replies_are_gzipped() {
        let Message::Binary(bytes) = encode(&procs(2000)) else {
            panic!("expected binary frame");
        };
        let mut js = String::new();
        GzDecoder::new(&bytes[..]).read_to_string(&mut js).unwrap();
        assert!(js.len() > GZIP_THRESHOLD);
        assert!(js.contains("worker-1999"));
    }

    #[tokio::test]
    async fn unknown_ops_are_bad_requests() {
        let state = AppState::new(None, true);
        match dispatch(&state, r#"{"op":"reboot"}"#).await {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::BadRequest),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminate_errors_carry_codes() {
        let state = AppState::new(None, false);
        match dispatch(&state, r#"{"op":"terminate","token":"1:0"}"#).await {
            Response::Error { code, message } => {
                assert_eq!(code, ErrorCode::Denied);
                assert!(message.contains("disabled"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

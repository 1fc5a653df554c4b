//! Client side of the LSP base protocol.
//!
//! Frames are `Content-Length` delimited JSON-RPC 2.0 messages. A [`Connection`] owns
//! a writer task and a reader task: responses are matched to pending requests by id,
//! server-initiated requests are answered on the spot, and notifications are handed to
//! the caller in arrival order through an unbounded channel.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_lsp::jsonrpc::{Error as JsonRpcError, Id};
use tower_lsp::lsp_types::notification::Notification;
use tower_lsp::lsp_types::request::Request;
use tracing::{debug, trace, warn};

const JSONRPC_VERSION: &str = "2.0";

/// Largest message body accepted from the server.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("connection to the language server is closed")]
    ConnectionClosed,
    #[error("failed to encode {method}: {source}")]
    Encode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed result for {method}: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{method} failed: {error}")]
    Server {
        method: &'static str,
        error: JsonRpcError,
    },
}

/// A notification sent by the language server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerNotification {
    pub method: String,
    pub params: Value,
}

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Serialize)]
struct ResponseFrame {
    jsonrpc: &'static str,
    id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct IncomingFrame {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

type PendingReply = oneshot::Sender<Result<Value, JsonRpcError>>;

struct Shared {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<HashMap<i64, PendingReply>>,
    next_id: AtomicI64,
    reader_closed: AtomicBool,
}

impl Shared {
    fn fail_pending(&self) {
        self.reader_closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            // Dropping the senders wakes every waiter with ConnectionClosed.
            pending.clear();
        }
    }
}

/// Handle to a running JSON-RPC connection. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Background tasks driving a [`Connection`].
pub struct ConnectionTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl ConnectionTasks {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Connection {
    /// Start the reader and writer tasks over a duplex stream.
    pub fn start<R, W>(
        reader: R,
        writer: W,
    ) -> (Self, mpsc::UnboundedReceiver<ServerNotification>, ConnectionTasks)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outgoing: outgoing_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            reader_closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(write_loop(writer, outgoing_rx));
        let reader = tokio::spawn(read_loop(
            BufReader::new(reader),
            shared.clone(),
            notification_tx,
        ));

        (
            Self { shared },
            notification_rx,
            ConnectionTasks { reader, writer },
        )
    }

    pub async fn send_notification<N>(&self, params: N::Params) -> Result<(), RpcError>
    where
        N: Notification,
    {
        let params = encode_params(N::METHOD, &params)?;
        debug!(method = N::METHOD, "sending notification");
        self.enqueue(N::METHOD, None, params)
    }

    pub async fn send_request<R>(&self, params: R::Params) -> Result<R::Result, RpcError>
    where
        R: Request,
    {
        let params = encode_params(R::METHOD, &params)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .map_err(|_| RpcError::ConnectionClosed)?;
            // Checked under the lock so a reader shutting down cannot miss this entry.
            if self.shared.reader_closed.load(Ordering::SeqCst) {
                return Err(RpcError::ConnectionClosed);
            }
            pending.insert(id, reply_tx);
        }

        debug!(method = R::METHOD, id, "sending request");
        if let Err(err) = self.enqueue(R::METHOD, Some(id), params) {
            if let Ok(mut pending) = self.shared.pending.lock() {
                pending.remove(&id);
            }
            return Err(err);
        }

        let reply = reply_rx.await.map_err(|_| RpcError::ConnectionClosed)?;
        let value = reply.map_err(|error| RpcError::Server {
            method: R::METHOD,
            error,
        })?;
        serde_json::from_value(value).map_err(|source| RpcError::Decode {
            method: R::METHOD,
            source,
        })
    }

    fn enqueue(&self, method: &str, id: Option<i64>, params: Option<Value>) -> Result<(), RpcError> {
        let frame = OutgoingFrame {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        };
        let body = serde_json::to_vec(&frame).map_err(|source| RpcError::Encode {
            method: "frame",
            source,
        })?;
        self.shared
            .outgoing
            .send(encode_frame(&body))
            .map_err(|_| RpcError::ConnectionClosed)
    }
}

/// `()` params are omitted from the frame rather than sent as `null`.
fn encode_params<P: Serialize>(method: &'static str, params: &P) -> Result<Option<Value>, RpcError> {
    let value = serde_json::to_value(params).map_err(|source| RpcError::Encode { method, source })?;
    Ok(if value.is_null() { None } else { Some(value) })
}

pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(body);
    frame
}

/// Read one framed message body. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            if saw_header {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a message header",
                ));
            }
            return Ok(None);
        }
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length header")
                })?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "message without Content-Length header")
    })?;
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Content-Length {length} exceeds the {MAX_FRAME_BYTES} byte limit"),
        ));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_loop<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outgoing.recv().await {
        trace!(bytes = frame.len(), "writing frame");
        if let Err(err) = writer.write_all(&frame).await {
            warn!("failed to write to the language server: {err}");
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!("failed to flush the language server stream: {err}");
            break;
        }
    }
    outgoing.close();
}

async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    notifications: mpsc::UnboundedSender<ServerNotification>,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        let body = match read_frame(&mut reader).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                debug!("language server closed the connection");
                break;
            }
            Err(err) => {
                warn!("failed to read from the language server: {err}");
                break;
            }
        };
        let frame: IncomingFrame = match serde_json::from_slice(&body) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("discarding malformed message from the language server: {err}");
                continue;
            }
        };
        match (frame.method, frame.id) {
            (Some(method), Some(id)) => {
                let reply = answer_server_request(&method, frame.params.as_ref());
                respond(&shared, id, reply);
            }
            (Some(method), None) => {
                trace!(%method, "received notification");
                let notification = ServerNotification {
                    method,
                    params: frame.params.unwrap_or(Value::Null),
                };
                if notifications.send(notification).is_err() {
                    debug!("notification receiver dropped");
                }
            }
            (None, Some(Id::Number(id))) => {
                let waiter = shared.pending.lock().ok().and_then(|mut p| p.remove(&id));
                let outcome = match frame.error {
                    Some(error) => Err(error),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(outcome);
                    }
                    None => warn!(id, "response for an unknown request"),
                }
            }
            (None, id) => warn!(?id, "message is neither a request nor a response"),
        }
    }
    shared.fail_pending();
}

/// Requests the language server may send to its client.
fn answer_server_request(method: &str, params: Option<&Value>) -> Result<Value, JsonRpcError> {
    debug!(%method, "answering server request");
    match method {
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => Ok(Value::Null),
        "workspace/configuration" => {
            let items = params
                .and_then(|params| params.get("items"))
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0);
            Ok(Value::Array(vec![Value::Null; items]))
        }
        _ => Err(JsonRpcError::method_not_found()),
    }
}

fn respond(shared: &Shared, id: Id, reply: Result<Value, JsonRpcError>) {
    let (result, error) = match reply {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    let frame = ResponseFrame {
        jsonrpc: JSONRPC_VERSION,
        id,
        result,
        error,
    };
    match serde_json::to_vec(&frame) {
        Ok(body) => {
            if shared.outgoing.send(encode_frame(&body)).is_err() {
                debug!("connection closed before the response was written");
            }
        }
        Err(err) => warn!("failed to encode response: {err}"),
    }
}

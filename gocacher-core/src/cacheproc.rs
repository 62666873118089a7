//! `GOCACHEPROG` protocol runner.
//!
//! The Go toolchain writes one JSON request per line to the helper's stdin.
//! A `put` with a non-empty body is followed by a line holding the body as a
//! base64 JSON string. Responses are JSON lines on stdout and may be written
//! in any order; the toolchain matches them up by `ID`.

use std::future::Future;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::backends::LocalCache;
use crate::error::{Error, Result};

pub const CMD_GET: &str = "get";
pub const CMD_PUT: &str = "put";
pub const CMD_CLOSE: &str = "close";

const KNOWN_COMMANDS: [&str; 3] = [CMD_GET, CMD_PUT, CMD_CLOSE];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Request {
    #[serde(rename = "ID")]
    id: i64,
    command: String,
    /// Base64 of the raw action id.
    #[serde(rename = "ActionID", default)]
    action_id: Option<String>,
    /// Base64 of the raw output id; `put` only.
    #[serde(rename = "OutputID", default)]
    output_id: Option<String>,
    #[serde(default)]
    body_size: u64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Response {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    err: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    known_commands: Vec<&'static str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    miss: bool,
    #[serde(rename = "OutputID", skip_serializing_if = "Option::is_none")]
    output_id: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk_path: Option<String>,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Response {
    fn new(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    fn miss(id: i64) -> Self {
        Self {
            id,
            miss: true,
            ..Default::default()
        }
    }

    fn error(id: i64, err: impl ToString) -> Self {
        Self {
            id,
            err: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Serves a cache over the `GOCACHEPROG` protocol.
pub struct CacheProc<C> {
    cache: Arc<C>,
}

impl<C> CacheProc<C>
where
    C: LocalCache + 'static,
{
    pub fn new(cache: Arc<C>) -> Self {
        Self { cache }
    }

    /// Runs until a `close` request or end of input.
    ///
    /// `get` and `put` requests are handled concurrently. The cache is closed
    /// exactly once, after in-flight requests finish.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed input or if the output cannot be written.
    /// Per-request cache failures are reported in the response's `Err` field.
    pub async fn run<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let served = self.serve(BufReader::new(reader), &tx).await;
        drop(tx);

        let written = writer_task
            .await
            .map_err(|e| Error::Protocol(format!("response writer panicked: {}", e)))?;
        served?;
        written
    }

    /// Like [`run`](Self::run), but stops reading requests once `shutdown`
    /// resolves. The cache is closed either way, so queued uploads finish.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), plus any error from closing the cache
    /// after shutdown.
    pub async fn run_until<R, W, F>(&self, reader: R, writer: W, shutdown: F) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        tokio::select! {
            served = self.run(reader, writer) => served,
            () = shutdown => {
                debug!("shutdown requested, closing cache");
                self.cache.close().await
            }
        }
    }

    async fn serve<R>(&self, reader: BufReader<R>, tx: &mpsc::UnboundedSender<Response>) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        send(
            tx,
            Response {
                known_commands: KNOWN_COMMANDS.to_vec(),
                ..Response::new(0)
            },
        )?;

        let mut lines = reader.lines();
        let mut in_flight = JoinSet::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let request: Request = serde_json::from_str(&line)?;
            debug!(id = request.id, command = %request.command, "request");

            match request.command.as_str() {
                CMD_GET => {
                    let cache = Arc::clone(&self.cache);
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        let id = request.id;
                        let response = handle_get(cache.as_ref(), request)
                            .await
                            .unwrap_or_else(|e| Response::error(id, e));
                        let _ = tx.send(response);
                    });
                }
                CMD_PUT => {
                    let body = if request.body_size > 0 {
                        let Some(body_line) = lines.next_line().await? else {
                            return Err(Error::Protocol(format!(
                                "missing body for put request {}",
                                request.id
                            )));
                        };
                        decode_body(&body_line, request.body_size)?
                    } else {
                        Bytes::new()
                    };

                    let cache = Arc::clone(&self.cache);
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        let id = request.id;
                        let response = handle_put(cache.as_ref(), request, body)
                            .await
                            .unwrap_or_else(|e| Response::error(id, e));
                        let _ = tx.send(response);
                    });
                }
                CMD_CLOSE => {
                    drain(&mut in_flight).await;
                    let response = match self.cache.close().await {
                        Ok(()) => Response::new(request.id),
                        Err(e) => Response::error(request.id, e),
                    };
                    send(tx, response)?;
                    return Ok(());
                }
                other => {
                    send(tx, Response::error(request.id, format!("unknown command {:?}", other)))?;
                }
            }
        }

        drain(&mut in_flight).await;
        debug!("input closed without close request");
        self.cache.close().await
    }
}

async fn handle_get<C: LocalCache + ?Sized>(cache: &C, request: Request) -> Result<Response> {
    let action_id = decode_id("action id", request.action_id.as_deref())?;

    let Some(entry) = cache.get(&action_id).await? else {
        return Ok(Response::miss(request.id));
    };

    let metadata = match tokio::fs::metadata(&entry.disk_path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Response::miss(request.id));
        }
        Err(e) => return Err(Error::Io(e)),
    };
    let output_id = hex::decode(&entry.output_id).map_err(|e| Error::InvalidId {
        kind: "output id",
        id: entry.output_id.clone(),
        message: e.to_string(),
    })?;

    Ok(Response {
        output_id: Some(BASE64.encode(output_id)),
        size: metadata.len(),
        disk_path: Some(entry.disk_path.to_string_lossy().into_owned()),
        ..Response::new(request.id)
    })
}

async fn handle_put<C: LocalCache + ?Sized>(
    cache: &C,
    request: Request,
    body: Bytes,
) -> Result<Response> {
    let action_id = decode_id("action id", request.action_id.as_deref())?;
    let output_id = decode_id("output id", request.output_id.as_deref())?;

    let disk_path = cache.put(&action_id, &output_id, body).await?;

    Ok(Response {
        disk_path: Some(disk_path.to_string_lossy().into_owned()),
        ..Response::new(request.id)
    })
}

/// Base64 id from the wire to the hex form the caches use.
fn decode_id(kind: &'static str, encoded: Option<&str>) -> Result<String> {
    let encoded = encoded.unwrap_or_default();
    let raw = BASE64.decode(encoded).map_err(|e| Error::InvalidId {
        kind,
        id: encoded.to_string(),
        message: e.to_string(),
    })?;
    if raw.is_empty() {
        return Err(Error::InvalidId {
            kind,
            id: String::new(),
            message: "missing".to_string(),
        });
    }
    Ok(hex::encode(raw))
}

fn decode_body(line: &str, expected: u64) -> Result<Bytes> {
    let encoded: String = serde_json::from_str(line)?;
    let body = BASE64
        .decode(encoded)
        .map_err(|e| Error::Protocol(format!("invalid body encoding: {}", e)))?;
    if body.len() as u64 != expected {
        return Err(Error::SizeMismatch {
            expected,
            actual: body.len() as u64,
        });
    }
    Ok(Bytes::from(body))
}

fn send(tx: &mpsc::UnboundedSender<Response>, response: Response) -> Result<()> {
    tx.send(response)
        .map_err(|_| Error::Protocol("response writer stopped".to_string()))
}

async fn drain(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "request handler failed");
        }
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Response>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = serde_json::to_vec(&response)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

//! The control socket: one JSON request per connection, answered with one
//! JSON response.

use std::{
    fs::Permissions,
    os::unix::prelude::PermissionsExt,
    path::Path,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    task::JoinHandle,
};

use crate::{board::Board, config::ObservabilityConfig};

const MAX_REQUEST_LEN: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Op {
    Show,
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub device: String,
    pub group: String,
    pub attribute: String,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Response {
    /// Shown text, or the number of bytes consumed by a store
    Ok(String),
    Error { kind: String, message: String },
}

impl From<busmux::Error> for Response {
    fn from(e: busmux::Error) -> Self {
        Response::Error {
            kind: e.kind().to_owned(),
            message: e.to_string(),
        }
    }
}

impl Board {
    /// Run one control request against the board
    pub fn handle(&self, request: &Request) -> Response {
        let result = self
            .group(&request.device, &request.group)
            .and_then(|group| match &request.op {
                Op::Show => group.read(&request.attribute),
                Op::Store(input) => group
                    .write(&request.attribute, input)
                    .map(|consumed| consumed.to_string()),
            });

        match result {
            Ok(text) => Response::Ok(text),
            Err(e) => {
                log::debug!(
                    "control request {}/{}/{} failed: {e}",
                    request.device,
                    request.group,
                    request.attribute
                );
                e.into()
            }
        }
    }
}

pub async fn spawn(
    config: &ObservabilityConfig,
    board: Arc<Board>,
) -> JoinHandle<std::io::Result<()>> {
    let config = config.clone();
    tokio::spawn(async move {
        let result = serve(config, board).await;
        if let Err(ref e) = result {
            log::warn!("Abnormal termination of the control socket: {e}");
            log::warn!("The control socket will not be available");
        }
        result
    })
}

async fn serve(config: ObservabilityConfig, board: Arc<Board>) -> std::io::Result<()> {
    let path = match config.control_path {
        Some(path) => path,
        None => return Ok(()),
    };

    // the daemon runs privileged, operators in the socket's group should not
    // need to be
    let permissions: Permissions = PermissionsExt::from_mode(config.control_permissions);
    let listener = create_unix_socket_with_permissions(&path, permissions)?;
    log::info!("control socket listening on {}", path.display());

    loop {
        let (stream, _addr) = listener.accept().await?;
        let board = board.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, board).await {
                log::warn!("control connection failed: {e}");
            }
        });
    }
}

async fn handle_connection(mut stream: UnixStream, board: Arc<Board>) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let request: Request = read_json(&mut stream, &mut buffer).await?;

    // attribute access blocks on the bus arbiter
    let response = tokio::task::spawn_blocking(move || board.handle(&request))
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    write_json(&mut stream, &response).await
}

fn other_error<T>(msg: String) -> std::io::Result<T> {
    use std::io::{Error, ErrorKind};
    Err(Error::new(ErrorKind::Other, msg))
}

pub fn create_unix_socket_with_permissions(
    path: &Path,
    permissions: Permissions,
) -> std::io::Result<UnixListener> {
    let listener = create_unix_socket(path)?;

    std::fs::set_permissions(path, permissions)?;

    Ok(listener)
}

fn create_unix_socket(path: &Path) -> std::io::Result<UnixListener> {
    // a stale socket makes the bind fail with "address already in use"
    if path.exists() {
        use std::os::unix::fs::FileTypeExt;

        let meta = std::fs::metadata(path)?;
        if !meta.file_type().is_socket() {
            return other_error(format!("path {path:?} exists but is not a socket"));
        }

        std::fs::remove_file(path)?;
    }

    let error = match UnixListener::bind(path) {
        Ok(listener) => return Ok(listener),
        Err(e) => e,
    };

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            return other_error(format!(
                "Could not create control socket at {path:?} because its parent directory does not exist"
            ));
        }
    }

    other_error(format!(
        "Could not create control socket at {path:?}: {error:?}"
    ))
}

/// Write `value` and close the write half, marking the end of the message.
pub async fn write_json<T>(stream: &mut UnixStream, value: &T) -> std::io::Result<()>
where
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await
}

/// Read one message, up to the peer closing its write half.
pub async fn read_json<'a, T>(stream: &mut UnixStream, buffer: &'a mut Vec<u8>) -> std::io::Result<T>
where
    T: Deserialize<'a>,
{
    buffer.clear();

    let n = (&mut *stream)
        .take(MAX_REQUEST_LEN)
        .read_to_end(buffer)
        .await?;
    buffer.truncate(n);
    serde_json::from_slice(buffer)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

//! Framed UNIX-socket client for the coldstore server.

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use coldstore_core::config::ServerConfig;
use coldstore_core::protocol::{ProgressRecord, Request, Response, SessionKey};
use coldstore_core::{ErrorKind, FileState};
use futures::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Connection to a running server, authenticated by the persisted session
/// key.
pub struct ApiClient {
    framed: Framed<UnixStream, LengthDelimitedCodec>,
    key: SessionKey,
}

/// A server-reported failure, carrying the wire-level kind for the exit
/// code.
#[derive(Debug)]
pub struct ServerFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for ServerFailure {}

/// Paths the client shares with the server, derived from the state
/// directory.
pub fn server_paths(state_dir: &Path) -> ServerConfig {
    ServerConfig {
        state_dir: state_dir.to_path_buf(),
        ..ServerConfig::default()
    }
}

/// Read the session key the server persisted at startup.
pub fn read_session_key(state_dir: &Path) -> Result<SessionKey> {
    let path = server_paths(state_dir).key_path();
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read session key {}", path.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("malformed session key in {}", path.display()))
}

impl ApiClient {
    /// Connect to the server socket under `state_dir`.
    pub async fn connect(state_dir: &Path) -> Result<Self> {
        let key = read_session_key(state_dir)?;
        let socket = server_paths(state_dir).socket_path();
        let stream = UnixStream::connect(&socket)
            .await
            .with_context(|| format!("cannot connect to server at {}", socket.display()))?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            key,
        })
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        let bytes = serde_json::to_vec(request)?;
        self.framed
            .send(Bytes::from(bytes))
            .await
            .context("request send failed")
    }

    async fn recv(&mut self) -> Result<Response> {
        let frame = self
            .framed
            .next()
            .await
            .context("connection closed by server")?
            .context("connection framing error")?;
        Ok(serde_json::from_slice(&frame)?)
    }

    /// One request, one response.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.recv().await
    }

    /// One request, responses streamed until `done` says the stream ended.
    pub async fn call_stream(
        &mut self,
        request: &Request,
        done: impl Fn(&Response) -> bool,
    ) -> Result<Vec<Response>> {
        self.send(request).await?;
        let mut rows = Vec::new();
        loop {
            let response = self.recv().await?;
            if let Response::Error { kind, message } = response {
                bail!(ServerFailure { kind, message });
            }
            if done(&response) {
                return Ok(rows);
            }
            rows.push(response);
        }
    }

    /// Submit a migration or recall and return its request number.
    pub async fn submit(&mut self, request: &Request) -> Result<i64> {
        match self.call(request).await? {
            Response::Submitted { reqnum } => Ok(reqnum),
            Response::Error { kind, message } => bail!(ServerFailure { kind, message }),
            other => bail!("unexpected response: {other:?}"),
        }
    }

    /// Watch a request until it reaches a terminal state, reporting each
    /// progress change through `report`.
    pub async fn wait_request(
        &mut self,
        reqnum: i64,
        mut report: impl FnMut(&ProgressRecord),
    ) -> Result<ProgressRecord> {
        let request = Request::Progress {
            key: self.key,
            reqnum,
        };
        loop {
            let response = self.call(&request).await?;
            match response {
                Response::Progress { record } => {
                    report(&record);
                    if record.state.is_terminal() {
                        return Ok(record);
                    }
                }
                Response::Error { kind, message } => bail!(ServerFailure { kind, message }),
                other => bail!("unexpected response: {other:?}"),
            }
        }
    }

    /// Ask the server to stop, retrying until in-flight work has drained.
    pub async fn stop(&mut self, forced: bool, finish: bool) -> Result<()> {
        let request = Request::Stop {
            key: self.key,
            forced,
            finish,
        };
        loop {
            let response = self.call(&request).await?;
            match response {
                Response::Stopping { success: true } => return Ok(()),
                Response::Stopping { success: false } => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Response::Error { kind, message } => bail!(ServerFailure { kind, message }),
                other => bail!("unexpected response: {other:?}"),
            }
        }
    }

    pub async fn migrate(
        &mut self,
        files: Vec<PathBuf>,
        target: FileState,
        pool: Option<String>,
    ) -> Result<i64> {
        let request = Request::Migrate {
            key: self.key,
            files,
            target,
            pool,
        };
        self.submit(&request).await
    }

    pub async fn recall(&mut self, files: Vec<PathBuf>, target: FileState) -> Result<i64> {
        let request = Request::Recall {
            key: self.key,
            files,
            target,
        };
        self.submit(&request).await
    }

    /// Expect a bare `Ok`, converting server errors into failures.
    pub async fn expect_ok(&mut self, request: &Request) -> Result<()> {
        match self.call(request).await? {
            Response::Ok => Ok(()),
            Response::Error { kind, message } => bail!(ServerFailure { kind, message }),
            other => bail!("unexpected response: {other:?}"),
        }
    }
}

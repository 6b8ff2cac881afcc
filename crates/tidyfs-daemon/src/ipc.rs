//! Control socket server
//!
//! Accepts connections strictly serially - there is no concurrency on the
//! control plane - and forwards each decoded request to the controller
//! loop over a channel, relaying the reply back as one JSON line. Bind
//! failure is fatal at startup; per-connection errors are logged and the
//! loop carries on.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tidyfs_ipc::endpoint;
use tidyfs_ipc::protocol::{Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::ControlRequest;

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    control_tx: mpsc::Sender<ControlRequest>,
    cancel: CancellationToken,
}

impl IpcServer {
    /// Cleans up any stale socket and binds. Errors here fail startup.
    pub fn bind(
        socket_path: PathBuf,
        control_tx: mpsc::Sender<ControlRequest>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        endpoint::prepare(&socket_path)?;
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("binding control socket {}", socket_path.display()))?;
        info!(path = %socket_path.display(), "Control socket listening");
        Ok(Self { listener, socket_path, control_tx, cancel })
    }

    /// Serves until cancelled, then removes the socket file.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        if let Err(err) = self.serve_connection(stream).await {
                            debug!(error = %format!("{err:#}"), "Control connection failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "Control accept failed"),
                },
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        info!("Control socket closed");
    }

    async fn serve_connection(&self, stream: UnixStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.context("reading request")?;

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => self.dispatch(request).await,
            Err(err) => Response::Error { message: format!("invalid request: {err}") },
        };

        let mut out = serde_json::to_vec(&response).context("encoding response")?;
        out.push(b'\n');
        write_half.write_all(&out).await.context("writing response")?;
        Ok(())
    }

    async fn dispatch(&self, request: Request) -> Response {
        match request {
            Request::Status => {
                let (tx, rx) = oneshot::channel();
                self.forward(ControlRequest::Status(tx), rx).await.map_or_else(
                    |message| Response::Error { message },
                    Response::Status,
                )
            }
            Request::Reload => {
                let (tx, rx) = oneshot::channel();
                self.relay(ControlRequest::Reload(tx), rx).await
            }
            Request::Enable => {
                let (tx, rx) = oneshot::channel();
                self.relay(ControlRequest::Enable(tx), rx).await
            }
            Request::Disable => {
                let (tx, rx) = oneshot::channel();
                self.relay(ControlRequest::Disable(tx), rx).await
            }
        }
    }

    /// Sends a request to the controller and awaits its reply value.
    async fn forward<T>(
        &self,
        request: ControlRequest,
        reply: oneshot::Receiver<T>,
    ) -> std::result::Result<T, String> {
        self.control_tx
            .send(request)
            .await
            .map_err(|_| "controller is shutting down".to_string())?;
        reply.await.map_err(|_| "controller dropped the request".to_string())
    }

    /// Forwards a request whose reply is already `Result<String, String>`.
    async fn relay(
        &self,
        request: ControlRequest,
        reply: oneshot::Receiver<std::result::Result<String, String>>,
    ) -> Response {
        match self.forward(request, reply).await {
            Ok(Ok(message)) => Response::Ok { message },
            Ok(Err(message)) | Err(message) => Response::Error { message },
        }
    }
}

//! One-shot control client
//!
//! Connects, sends one request line, reads one response line. Used by the
//! CLI subcommands; a failed connect usually just means the daemon is not
//! running.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::protocol::{Request, Response};

/// Performs one request/response round-trip against the daemon socket.
pub async fn request(socket: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket)
        .await
        .with_context(|| format!("connecting to daemon at {}", socket.display()))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_vec(request).context("encoding request")?;
    line.push(b'\n');
    write_half.write_all(&line).await.context("sending request")?;
    write_half.shutdown().await.ok();

    let mut reader = BufReader::new(read_half);
    let mut reply = String::new();
    reader.read_line(&mut reply).await.context("reading response")?;
    if reply.is_empty() {
        anyhow::bail!("daemon closed the connection without a response");
    }
    serde_json::from_str(&reply).context("decoding response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_roundtrip_against_fake_daemon() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("test.sock");
        let listener = UnixListener::bind(&sock).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();

            let req: Request = serde_json::from_str(&line).unwrap();
            assert_eq!(req, Request::Enable);

            let response = Response::Ok { message: "watching".into() };
            let mut out = serde_json::to_vec(&response).unwrap();
            out.push(b'\n');
            write_half.write_all(&out).await.unwrap();
        });

        let response = request(&sock, &Request::Enable).await.unwrap();
        assert_eq!(response, Response::Ok { message: "watching".into() });
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("absent.sock");
        assert!(request(&sock, &Request::Status).await.is_err());
    }
}

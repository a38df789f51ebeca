/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Artifact server: serves the executor binary to agents over HTTP.
//!
//! Exactly one file is served, on `GET /<basename>`.  Agents fetch it into
//! their sandbox via the [`CommandUri`] in the [`ExecutorInfo`] and start it
//! with `./<basename>`.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::offer::{CommandUri, ExecutorId, ExecutorInfo};

/// Executor id every placement of this framework runs under.
pub const EXECUTOR_ID: &str = "flotilla";

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// HTTP route for `path`: `/` followed by its last path segment.
pub fn http_path(path: &str) -> String {
    format!("/{}", basename(path))
}

/// Sandbox command that starts the fetched `path`.
pub fn executor_command(path: &str) -> String {
    format!("./{}", basename(path))
}

/// Build the [`ExecutorInfo`] handed to the transport.
pub fn executor_info(uri: &str, command: &str) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: ExecutorId::new(EXECUTOR_ID),
        name: "Flotilla Executor".to_string(),
        command: command.to_string(),
        uris: vec![CommandUri {
            value: uri.to_string(),
            executable: true,
        }],
    }
}

/// A running artifact server.
#[derive(Debug)]
pub struct ArtifactServer {
    /// Public URI of the served file.
    pub uri: String,
    pub local_addr: SocketAddr,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl ArtifactServer {
    /// Read `file`, bind `address:port` and serve the file in a background
    /// task.  Port `0` binds an ephemeral port; `uri` reports the real one.
    pub async fn launch(address: &str, port: u16, file: &Path) -> Result<Self> {
        let body = Bytes::from(
            tokio::fs::read(file)
                .await
                .with_context(|| format!("Failed to read artifact: {}", file.display()))?,
        );
        let path = http_path(&file.to_string_lossy());

        let app = Router::new().route(&path, get(move || async move { body }));

        let listener = TcpListener::bind((address, port))
            .await
            .with_context(|| format!("Failed to bind artifact server on {address}:{port}"))?;
        let local_addr = listener.local_addr()?;
        let uri = format!("http://{address}:{}{path}", local_addr.port());

        info!(uri = %uri, file = %file.display(), "artifact server listening");

        let handle = tokio::spawn(async move { axum::serve(listener, app).await });

        Ok(Self {
            uri,
            local_addr,
            handle,
        })
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn path_helpers_use_last_segment() {
        assert_eq!(http_path("target/release/flotilla-exec"), "/flotilla-exec");
        assert_eq!(executor_command("target/release/flotilla-exec"), "./flotilla-exec");
        assert_eq!(http_path("flotilla-exec"), "/flotilla-exec");
    }

    #[test]
    fn executor_info_marks_uri_executable() {
        let info = executor_info("http://127.0.0.1:12345/flotilla-exec", "./flotilla-exec");
        assert_eq!(info.executor_id.as_str(), EXECUTOR_ID);
        assert!(info.uris[0].executable);
        assert_eq!(info.command, "./flotilla-exec");
    }

    #[tokio::test]
    async fn serves_file_on_its_basename() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\necho hi\n").unwrap();

        let server = ArtifactServer::launch("127.0.0.1", 0, file.path())
            .await
            .unwrap();
        let body = reqwest::get(&server.uri).await.unwrap().bytes().await.unwrap();
        assert_eq!(&body[..], b"#!/bin/sh\necho hi\n");

        let other = format!("http://{}/other", server.local_addr);
        let status = reqwest::get(&other).await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

        server.shutdown();
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = ArtifactServer::launch("127.0.0.1", 0, Path::new("/no/such/file"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read artifact"));
    }
}

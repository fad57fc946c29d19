//! Async Unix socket server for the text-in / text-out path.

use crate::error::{Result, VoxdError};
use crate::ipc::protocol::{PromptReply, PromptRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Handler trait for answering prompts.
#[async_trait::async_trait]
pub trait PromptHandler: Send + Sync {
    /// Answer one prompt.
    async fn handle(&self, request: PromptRequest) -> PromptReply;
}

/// State for managing server shutdown.
#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<Mutex<bool>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    async fn is_shutdown(&self) -> bool {
        *self.shutdown.lock().await
    }

    async fn set_shutdown(&self) {
        *self.shutdown.lock().await = true;
    }
}

/// Socket server feeding prompts into the pipeline's alt-text path.
pub struct IpcServer {
    socket_path: PathBuf,
    state: ServerState,
}

impl IpcServer {
    /// Create a new server bound to the specified socket path.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            state: ServerState::new(),
        }
    }

    /// Get the socket path this server is using.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Get the default socket path based on XDG_RUNTIME_DIR or fallback.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("voxd.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/voxd-{}.sock", uid))
        }
    }

    /// Accept connections until `stop` is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: PromptHandler + 'static,
    {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| VoxdError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| VoxdError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        info!("listening on {}", self.socket_path.display());

        let handler = Arc::new(handler);

        loop {
            if self.state.is_shutdown().await {
                break;
            }

            // Accept with a timeout so the shutdown flag stays observable
            let accept_result =
                tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accept_result {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            warn!("client error: {}", e);
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(VoxdError::IpcSocket {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => {
                    // Timeout - check shutdown flag again
                    continue;
                }
            }
        }

        Ok(())
    }

    /// Stop the server and clean up the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.state.set_shutdown().await;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| VoxdError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

/// Handle a single client connection: one request line, one reply line.
async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: PromptHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| VoxdError::IpcSocket {
            message: format!("Failed to read from client: {}", e),
        })?;

    let reply = match PromptRequest::from_json(line.trim()) {
        Ok(request) if request.prompt.is_empty() => PromptReply::error("missing prompt"),
        Ok(request) => handler.handle(request).await,
        Err(e) => PromptReply::error(format!("invalid request: {}", e)),
    };

    let reply_json = reply.to_json().map_err(|e| VoxdError::IpcProtocol {
        message: format!("Failed to serialize reply: {}", e),
    })?;

    writer
        .write_all(reply_json.as_bytes())
        .await
        .map_err(|e| VoxdError::IpcSocket {
            message: format!("Failed to write to client: {}", e),
        })?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| VoxdError::IpcSocket {
            message: format!("Failed to write newline to client: {}", e),
        })?;
    writer.flush().await.map_err(|e| VoxdError::IpcSocket {
        message: format!("Failed to flush writer: {}", e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct EchoHandler;

    #[async_trait::async_trait]
    impl PromptHandler for EchoHandler {
        async fn handle(&self, request: PromptRequest) -> PromptReply {
            if request.prompt == "fail" {
                PromptReply::error("asked to fail")
            } else {
                PromptReply::response(request.prompt)
            }
        }
    }

    async fn roundtrip(socket: &Path, line: &str) -> String {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer.write_all(line.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        writer.flush().await.unwrap();

        let mut reader = BufReader::new(reader);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();
        reply.trim().to_string()
    }

    #[tokio::test]
    async fn test_server_answers_prompt() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("voxd-test.sock");
        let server = Arc::new(IpcServer::new(socket.clone()));

        let server_task = {
            let server = server.clone();
            tokio::spawn(async move { server.start(EchoHandler).await })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let reply = roundtrip(&socket, r#"{"prompt":"hello"}"#).await;
        assert_eq!(reply, r#"{"response":"hello"}"#);

        server.stop().await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_reports_handler_errors() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("voxd-test.sock");
        let server = Arc::new(IpcServer::new(socket.clone()));

        let server_task = {
            let server = server.clone();
            tokio::spawn(async move { server.start(EchoHandler).await })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let reply = roundtrip(&socket, r#"{"prompt":"fail"}"#).await;
        assert_eq!(reply, r#"{"error":"asked to fail"}"#);

        server.stop().await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_bad_requests() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("voxd-test.sock");
        let server = Arc::new(IpcServer::new(socket.clone()));

        let server_task = {
            let server = server.clone();
            tokio::spawn(async move { server.start(EchoHandler).await })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let reply = roundtrip(&socket, "this is not json").await;
        assert!(reply.contains("error"));

        let reply = roundtrip(&socket, r#"{"prompt":""}"#).await;
        assert_eq!(reply, r#"{"error":"missing prompt"}"#);

        server.stop().await.unwrap();
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_removes_socket_file() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("voxd-test.sock");
        let server = Arc::new(IpcServer::new(socket.clone()));

        let server_task = {
            let server = server.clone();
            tokio::spawn(async move { server.start(EchoHandler).await })
        };
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        assert!(socket.exists());

        server.stop().await.unwrap();
        server_task.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[test]
    fn test_default_socket_path_is_user_scoped() {
        let path = IpcServer::default_socket_path();
        assert!(path.to_string_lossy().contains("voxd"));
    }
}

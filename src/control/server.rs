//! TCP control server and client

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::codec::{self, read_frame, write_frame};
use super::message::{Request, Response};
use super::Controller;
use crate::config::ControlConfig;
use crate::error::StatusCode;
use crate::{Error, Result};

/// Serves the control protocol over TCP
pub struct ControlServer {
    config: ControlConfig,
    controller: Arc<Controller>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ControlServer {
    pub fn new(config: ControlConfig, controller: Arc<Controller>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            controller,
            shutdown_tx,
        }
    }

    /// Handle for stopping `run`/`serve`.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(listen = %listener.local_addr()?, "control server listening");

        loop {
            tokio::select! {
                accept = listener.accept() => {
                    match accept {
                        Ok((stream, peer)) => {
                            let controller = Arc::clone(&self.controller);
                            let max_len = self.config.max_message_len;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer, controller, max_len).await {
                                    warn!(%peer, error = %e, "control connection closed");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept control connection");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("control server shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    controller: Arc<Controller>,
    max_len: usize,
) -> Result<()> {
    debug!(%peer, "control connection opened");

    while let Some((_, body)) = read_frame(&mut stream, max_len).await? {
        let response = match codec::decode::<Request>(&body) {
            Ok(request) => {
                debug!(%peer, op = request.op(), "control request");
                let controller = Arc::clone(&controller);
                // Detach and drain block the calling thread.
                tokio::task::spawn_blocking(move || controller.handle(request))
                    .await
                    .unwrap_or_else(|e| Response::error(StatusCode::Internal, e.to_string()))
            }
            Err(e) => Response::from(&e),
        };
        write_frame(&mut stream, &response, response.status).await?;
    }

    debug!(%peer, "control connection finished");
    Ok(())
}

/// Control-channel client
pub struct ControlClient {
    stream: TcpStream,
    max_len: usize,
}

impl ControlClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream,
            max_len: codec::DEFAULT_MAX_MESSAGE_LEN,
        })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.stream, request, StatusCode::Ok).await?;
        let (_, body) = read_frame(&mut self.stream, self.max_len)
            .await?
            .ok_or_else(|| Error::Internal("control connection closed".into()))?;
        codec::decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::{Datapath, Limits, Vtep};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start() -> (SocketAddr, broadcast::Sender<()>, tokio::task::JoinHandle<Result<()>>) {
        let dp = Datapath::new(Vtep::default(), "uplink0", Limits::default());
        let controller = Arc::new(Controller::new(Arc::new(dp)));
        let config = ControlConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
            max_message_len: 1024,
        };
        let server = ControlServer::new(config, controller);
        let shutdown = server.shutdown_sender();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        (addr, shutdown, handle)
    }

    #[tokio::test]
    async fn test_client_server() {
        let (addr, shutdown, handle) = start().await;
        let mut client = ControlClient::connect(addr).await.unwrap();

        let resp = client
            .call(&Request::CreateNamespace { name: "blue".into() })
            .await
            .unwrap();
        assert!(resp.is_ok());

        let resp = client
            .call(&Request::CreateNamespace { name: "blue".into() })
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::AlreadyExists);

        let resp = client.call(&Request::ListNamespaces).await.unwrap();
        assert_eq!(resp.payload.unwrap(), serde_json::json!(["blue"]));

        shutdown.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_body_keeps_connection() {
        let (addr, shutdown, _handle) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let body = br#"{"op":"nonsense"}"#;
        let header = codec::FrameHeader::new(body.len(), StatusCode::Ok).unwrap();
        stream.write_all(&header.to_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let (header, body) = read_frame(&mut stream, 1024).await.unwrap().unwrap();
        assert_eq!(header.status, StatusCode::InvalidArgument as u32);
        let resp: Response = codec::decode(&body).unwrap();
        assert_eq!(resp.status, StatusCode::InvalidArgument);

        write_frame(&mut stream, &Request::ListNamespaces, StatusCode::Ok)
            .await
            .unwrap();
        assert!(read_frame(&mut stream, 1024).await.unwrap().is_some());
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let (addr, shutdown, _handle) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let header = codec::FrameHeader::new(4096, StatusCode::Ok).unwrap();
        stream.write_all(&header.to_bytes()).await.unwrap();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        let _ = shutdown.send(());
    }
}

//! Endpoint server for exposing metrics and the purchaser status

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::metrics::metrics;
use crate::shutdown;
use crate::ticket_buyer::ControllerStatus;

/// Serve `/metrics` (Prometheus text) and `/status` (latest controller
/// snapshot as JSON) until shutdown.
pub async fn endpoint_server(
    listener: TcpListener,
    status: watch::Receiver<ControllerStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("Metrics endpoint listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            _ = shutdown::requested(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => {
                    let status = status.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, status).await {
                            tracing::debug!("Endpoint connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            },
        }
    }
    Ok(())
}

/// Bind on all interfaces
pub async fn bind(port: u16) -> Result<TcpListener> {
    Ok(TcpListener::bind(("0.0.0.0", port)).await?)
}

async fn handle_connection(mut socket: TcpStream, status: watch::Receiver<ControllerStatus>) -> Result<()> {
    let mut buf = [0; 1024];
    let n = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (code, content_type, body) = match path {
        "/metrics" => ("200 OK", "text/plain; version=0.0.4", metrics().encode_text()?),
        "/status" => {
            let snapshot = status.borrow().clone();
            ("200 OK", "application/json", serde_json::to_string(&snapshot)?)
        }
        "/health" => ("200 OK", "text/plain", "ok".to_string()),
        _ => ("404 Not Found", "text/plain", "not found".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        code,
        content_type,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    Ok(())
}

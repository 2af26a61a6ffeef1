//! Endpoint server for exposing metrics and health checks

use crate::metrics::metrics;
use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Start the endpoint server and serve until `cancel` fires
///
/// `GET /metrics` returns the Prometheus text exposition, `GET /health`
/// returns `ok`, anything else is a 404.
pub async fn endpoint_server(port: u16, cancel: CancellationToken) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind metrics endpoint on {addr}"))?;

    tracing::info!("Metrics endpoint listening on {}", addr);
    serve(listener, cancel).await;
    Ok(())
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, _)) => {
                tokio::spawn(async move {
                    if let Err(e) = handle(socket).await {
                        tracing::debug!("Metrics connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
    tracing::debug!("Metrics endpoint stopped");
}

async fn handle(mut socket: TcpStream) -> Result<()> {
    let mut buf = [0; 1024];
    let n = socket.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let (status, body) = match path {
        "/metrics" => match metrics().render() {
            Ok(text) => ("200 OK", text),
            Err(e) => ("500 Internal Server Error", e.to_string()),
        },
        "/health" => ("200 OK", "ok".to_string()),
        _ => ("404 Not Found", "not found".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await?;
    Ok(())
}

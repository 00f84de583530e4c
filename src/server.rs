// Counting HTTP server
// Serves an axum router over HTTP/1.1 with every accepted connection
// wrapped in a `CountingStream`, and hands each request the handle of the
// connection it arrived on
//
// Numan Thabit 2025 Nov

use crate::connection::{ConnectionHandle, CountingStream};
use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tower::Service;
use tracing::{debug, info, warn};

/// Accept connections on `listener` until `shutdown` resolves. Connections
/// already accepted keep running until their client goes away.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send,
{
    let local = listener.local_addr()?;
    info!(address = %local, "api server listening");
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!(address = %local, "api server stopped accepting connections");
                return Ok(());
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }
        tokio::spawn(serve_connection(stream, peer, app.clone()));
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, app: Router) {
    let conn = ConnectionHandle::new();
    debug!(peer = %peer, connection = %conn.id(), "connection accepted");

    let io = TokioIo::new(CountingStream::new(stream, conn.clone()));
    let handle = conn.clone();
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(handle.clone());
        let mut app = app.clone();
        app.call(req)
    });

    // Pipelined requests that arrive in one read are charged to the first of
    // them; per-connection totals stay exact.
    if let Err(err) = http1::Builder::new()
        .keep_alive(true)
        .pipeline_flush(false)
        .serve_connection(io, service)
        .await
    {
        debug!(peer = %peer, connection = %conn.id(), error = %err, "connection error");
    }

    debug!(
        peer = %peer,
        connection = %conn.id(),
        bytes_read = conn.bytes_read(),
        bytes_written = conn.bytes_written(),
        "connection closed"
    );
}

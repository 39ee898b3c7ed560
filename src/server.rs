// Copyright 2025 The spaserve Authors
// SPDX-License-Identifier: Apache-2.0

//! HTTPS server for single-page apps: serves files that exist on disk and
//! substitutes the SPA document for every route that does not.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use rustls::ServerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tower_http::services::ServeDir;

use crate::{Error, Result};

/// Graceful shutdown timeout for draining in-flight connections.
const GRACEFUL_SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Unified response body: static-file streams and in-memory bodies alike.
type ResBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Serving configuration, immutable once the listener is up.
#[derive(Debug, Clone)]
pub struct SpaConfig {
    /// Port the TLS listener binds on, all interfaces. Dual-stack where the
    /// host supports it, IPv4-only otherwise.
    pub listen_port: u16,
    /// Directory files are served from.
    pub root: PathBuf,
    /// Document served for paths with no matching file, relative to `root`.
    pub spa_path: PathBuf,
}

/// Per-request state shared across connections.
struct ServerState {
    root: PathBuf,
    spa_path: PathBuf,
    serve_dir: ServeDir,
}

fn full_body(bytes: Bytes) -> ResBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

fn error_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ResBody> {
    Response::builder()
        .status(status)
        .body(full_body(body.into()))
        .unwrap_or_else(|_| Response::new(full_body(Bytes::from_static(b"Internal Server Error"))))
}

/// Load TLS config from cert/key files (validates expiry).
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    use rustls_pemfile::{certs, private_key};
    use std::io::BufReader;

    // Blocking I/O
    let cert_path_owned = cert_path.to_path_buf();
    let key_path_owned = key_path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let cert_pem = std::fs::read_to_string(&cert_path_owned).map_err(|e| Error::ReadFile {
            path: cert_path_owned.clone(),
            source: e,
        })?;

        if let Ok(cert_info) = crate::x509::parse_cert_pem(&cert_pem) {
            if cert_info.is_expired() {
                return Err(Error::Config(format!(
                    "Certificate {} has expired",
                    cert_path_owned.display()
                )));
            }
        }

        let mut cert_chain = Vec::new();
        for (i, result) in certs(&mut cert_pem.as_bytes()).enumerate() {
            match result {
                Ok(cert) => cert_chain.push(cert),
                Err(e) => {
                    return Err(Error::Config(format!(
                        "Failed to parse certificate {} in chain: {}",
                        i + 1,
                        e
                    )));
                }
            }
        }

        if cert_chain.is_empty() {
            return Err(Error::Config("No certificates found in cert file".into()));
        }

        let key_file = std::fs::File::open(&key_path_owned).map_err(|e| Error::ReadFile {
            path: key_path_owned.clone(),
            source: e,
        })?;
        let key = private_key(&mut BufReader::new(key_file))
            .map_err(|e| Error::Config(format!("Failed to parse private key: {}", e)))?
            .ok_or_else(|| Error::Config("No private key found in key file".into()))?;

        let mut tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| Error::Config(format!("TLS error: {}", e)))?;
        tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(tls_config)
    })
    .await
    .map_err(|e| Error::Config(format!("Task join error: {}", e)))?
}

/// Bind the listening socket. Prefers a dual-stack IPv6 socket so clients
/// resolving `localhost` to either `::1` or `127.0.0.1` reach the server;
/// hosts without IPv6 support get a plain IPv4 socket.
fn bind_listener(port: u16) -> std::io::Result<std::net::TcpListener> {
    let (socket, addr) = match Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) if socket.set_only_v6(false).is_ok() => {
            (socket, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
        }
        _ => (
            Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?,
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
        ),
    };
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Accept TLS connections and serve SPA requests until Ctrl+C.
pub async fn run_server(config: SpaConfig, tls_config: ServerConfig) -> Result<()> {
    let SpaConfig {
        listen_port,
        root,
        spa_path,
    } = config;

    let tls_acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = bind_listener(listen_port)
        .and_then(TcpListener::from_std)
        .map_err(|e| Error::BindFailed {
            addr: format!(":{}", listen_port),
            reason: e.to_string(),
        })?;

    let state = Arc::new(ServerState {
        serve_dir: ServeDir::new(&root),
        root,
        spa_path,
    });

    // Track all spawned connection tasks for graceful shutdown
    let mut connection_tasks: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            // Handle Ctrl+C signal
            _ = signal::ctrl_c() => {
                println!("\nShutting down gracefully...");

                // Wait for in-flight connections with timeout
                let active_count = connection_tasks.len();
                if active_count > 0 {
                    println!("Waiting for {} active connection(s) to complete (timeout: {}s)...",
                             active_count, GRACEFUL_SHUTDOWN_TIMEOUT.as_secs());

                    let drain_result = tokio::time::timeout(
                        GRACEFUL_SHUTDOWN_TIMEOUT,
                        drain_connections(&mut connection_tasks)
                    ).await;

                    match drain_result {
                        Ok(_) => println!("All connections completed."),
                        Err(_) => {
                            let remaining = connection_tasks.len();
                            println!("Timeout reached, aborting {} remaining connection(s).", remaining);
                            connection_tasks.abort_all();
                        }
                    }
                }

                println!("Server stopped.");
                return Ok(());
            }

            // Accept new connections
            accept_result = listener.accept() => {
                let (stream, peer_addr) = match accept_result {
                    Ok(conn) => conn,
                    Err(e) => {
                        eprintln!("Accept error: {}", e);
                        continue;
                    }
                };

                let acceptor = tls_acceptor.clone();
                let state = Arc::clone(&state);

                // Spawn connection handler and track it in JoinSet
                connection_tasks.spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            let io = TokioIo::new(tls_stream);
                            let svc = service_fn(move |req| {
                                handle_request(req, Arc::clone(&state))
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                                if !e.to_string().contains("connection closed") {
                                    eprintln!("Connection error from {}: {}", peer_addr, e);
                                }
                            }
                        }
                        Err(e) => eprintln!("TLS handshake failed from {}: {}", peer_addr, e),
                    }
                });

                // Clean up completed tasks to prevent unbounded growth
                while connection_tasks.try_join_next().is_some() {}
            }
        }
    }
}

/// Drain all connections from the JoinSet, waiting for each to complete.
async fn drain_connections(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
}

/// Parse the `delay` query parameter: milliseconds to stall the request.
/// Anything that does not parse as a non-negative integer is ignored.
fn delay_param(query: Option<&str>) -> Option<u64> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("delay="))
        .and_then(|value| value.parse::<u64>().ok())
}

/// Map a request path to the file it names under `root`. Percent escapes are
/// undone first so the existence check sees the same name the file server
/// resolves when it serves the response.
fn requested_file(root: &Path, uri_path: &str) -> PathBuf {
    let decoded = percent_decode_str(uri_path).decode_utf8_lossy();
    root.join(decoded.trim_start_matches('/'))
}

/// Serve one request: optional artificial delay, then the file if it exists
/// on disk, else the SPA document.
async fn handle_request<B>(
    req: Request<B>,
    state: Arc<ServerState>,
) -> std::result::Result<Response<ResBody>, hyper::Error>
where
    B: Send + 'static,
{
    // Artificial latency for testing loading states; stalls only this request
    if let Some(ms) = delay_param(req.uri().query()) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }

    // A path that exists on disk is served as a plain static file
    if tokio::fs::metadata(requested_file(&state.root, req.uri().path()))
        .await
        .is_ok()
    {
        let mut serve_dir = state.serve_dir.clone();
        return match serve_dir.try_call(req).await {
            Ok(response) => Ok(response.map(|body| body.boxed_unsync())),
            Err(e) => Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Static file error: {}", e),
            )),
        };
    }

    // Everything else gets the SPA document, re-read on every request so
    // edits show up without a restart
    let spa_file = state.root.join(&state.spa_path);
    match tokio::fs::read(&spa_file).await {
        Ok(contents) => Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .body(full_body(Bytes::from(contents)))
            .unwrap_or_else(|_| Response::new(full_body(Bytes::new())))),
        Err(e) => Ok(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not read SPA file: {}", e),
        )),
    }
}

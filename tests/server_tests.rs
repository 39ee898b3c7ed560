//! End-to-end tests for the HTTPS server
//!
//! Each test issues a throwaway ECDSA certificate into a temp directory,
//! starts the server on a free port inside the test runtime, and talks to
//! it over real TLS with certificate verification disabled.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use spaserve::{
    load_tls_config, run_server, Cert, CertOptions, EcdsaCurve, KeyAlgorithm, SpaConfig,
    CERT_FILE, KEY_FILE,
};

/// Client-side verifier that accepts any server certificate. The server
/// presents a freshly self-signed cert, so there is nothing to chain to.
#[derive(Debug, Default)]
struct NoCertVerification;

impl ServerCertVerifier for NoCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Pick a port that is free at the time of the call
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe socket");
    let port = listener
        .local_addr()
        .expect("Failed to read local addr")
        .port();
    drop(listener);
    port
}

/// Issue a certificate into `root`, start the server, and wait for the
/// listener to come up. The server task dies with the test runtime.
async fn start_server(root: &Path, spa: &str) -> u16 {
    let options = CertOptions {
        algorithm: KeyAlgorithm::Ecdsa {
            curve: EcdsaCurve::P256,
        },
        ..CertOptions::default()
    };
    let cert = Cert::issue(&options).expect("Failed to issue certificate");
    cert.save(root).expect("Failed to save certificate");

    let tls_config = load_tls_config(&root.join(CERT_FILE), &root.join(KEY_FILE))
        .await
        .expect("Failed to load TLS config");

    let port = free_port();
    let config = SpaConfig {
        listen_port: port,
        root: root.to_path_buf(),
        spa_path: PathBuf::from(spa),
    };
    tokio::spawn(run_server(config, tls_config));

    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return port;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Server did not start listening on port {}", port);
}

struct HttpResponse {
    status: u16,
    head: String,
    body: Vec<u8>,
}

/// Issue a single GET over TLS and read the whole response
async fn https_get(port: u16, target: &str) -> HttpResponse {
    let mut config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertVerification))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("Failed to connect");
    let name = ServerName::try_from("localhost").expect("Invalid server name");
    let mut stream = connector
        .connect(name, tcp)
        .await
        .expect("TLS handshake failed");

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        target
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to send request");

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .expect("Failed to read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("Response has no header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("Response has no status code");

    HttpResponse { status, head, body }
}

#[tokio::test]
async fn test_serves_existing_file_over_tls() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("app.js"), "console.log(\"ready\");\n")
        .expect("Failed to write file");
    std::fs::write(dir.path().join("index.html"), "<html>spa</html>\n")
        .expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/app.js").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"console.log(\"ready\");\n");
}

#[tokio::test]
async fn test_percent_encoded_path_serves_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("my file.txt"), "needs encoding\n")
        .expect("Failed to write file");
    std::fs::write(dir.path().join("index.html"), "<html>spa</html>\n")
        .expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/my%20file.txt").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"needs encoding\n");
    assert!(
        res.head.contains("text/plain"),
        "asset should keep its own content type, got: {}",
        res.head
    );
}

#[tokio::test]
async fn test_unknown_route_gets_spa_document() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("index.html"), "<html>spa</html>\n")
        .expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/users/42/profile").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"<html>spa</html>\n");
    assert!(
        res.head.contains("text/html"),
        "SPA document should be served as HTML, got: {}",
        res.head
    );
}

#[tokio::test]
async fn test_root_path_gets_spa_document() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("index.html"), "<html>spa</html>\n")
        .expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"<html>spa</html>\n");
}

#[tokio::test]
async fn test_custom_spa_document() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("app.html"), "<html>custom</html>\n")
        .expect("Failed to write file");

    let port = start_server(dir.path(), "app.html").await;

    let res = https_get(port, "/missing/route").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"<html>custom</html>\n");
}

#[tokio::test]
async fn test_missing_spa_file_is_500() {
    let dir = TempDir::new().expect("Failed to create temp dir");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/anything").await;
    assert_eq!(res.status, 500);
    let body = String::from_utf8_lossy(&res.body);
    assert!(
        body.starts_with("Could not read SPA file: "),
        "got: {}",
        body
    );
}

#[tokio::test]
async fn test_spa_document_reread_after_edit() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("index.html"), "v1").expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/route").await;
    assert_eq!(res.body, b"v1");

    std::fs::write(dir.path().join("index.html"), "v2").expect("Failed to write file");

    let res = https_get(port, "/route").await;
    assert_eq!(res.body, b"v2", "edits should show up without a restart");
}

#[tokio::test]
async fn test_delay_stalls_response() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("index.html"), "spa").expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let started = Instant::now();
    let res = https_get(port, "/?delay=400").await;
    assert_eq!(res.status, 200);
    assert!(
        started.elapsed() >= Duration::from_millis(400),
        "delay=400 should stall for at least 400ms"
    );
}

#[tokio::test]
async fn test_delay_does_not_block_other_requests() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("app.js"), "fast").expect("Failed to write file");
    std::fs::write(dir.path().join("index.html"), "spa").expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let started = Instant::now();
    let (delayed, quick) = tokio::join!(
        async {
            let res = https_get(port, "/?delay=800").await;
            (res, started.elapsed())
        },
        async {
            let res = https_get(port, "/app.js").await;
            (res, started.elapsed())
        }
    );

    assert_eq!(delayed.0.status, 200);
    assert_eq!(quick.0.status, 200);
    assert!(
        delayed.1 >= Duration::from_millis(800),
        "delayed request should stall"
    );
    assert!(
        quick.1 < delayed.1,
        "request without delay should finish first ({:?} vs {:?})",
        quick.1,
        delayed.1
    );
}

#[tokio::test]
async fn test_invalid_delay_is_ignored() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("index.html"), "spa").expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/?delay=soon").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"spa");
}

#[tokio::test]
async fn test_query_string_does_not_hide_files() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("app.js"), "fast").expect("Failed to write file");
    std::fs::write(dir.path().join("index.html"), "spa").expect("Failed to write file");

    let port = start_server(dir.path(), "index.html").await;

    let res = https_get(port, "/app.js?cache=bust").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"fast");
}

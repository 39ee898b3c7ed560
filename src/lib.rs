// Copyright 2025 The spaserve Authors
// SPDX-License-Identifier: Apache-2.0

//! Self-issuing HTTPS server for single-page apps in development.
//!
//! ```rust,no_run
//! use spaserve::{Cert, CertOptions};
//! use std::path::Path;
//!
//! let cert = Cert::issue(&CertOptions::default())?;
//! cert.save(Path::new("."))?;
//! # Ok::<(), spaserve::Error>(())
//! ```

/// Certificate issuance and persistence.
pub mod cert;
/// Configuration handling.
pub mod config;
/// Error types.
pub mod error;
/// Filesystem utilities.
pub mod fs;
/// HTTPS server with SPA fallback.
pub mod server;
/// X.509 certificate parsing.
pub mod x509;

pub use cert::{
    validate_days, Cert, CertOptions, EcdsaCurve, KeyAlgorithm, KeyPair, CERT_FILE, CERT_ORG_NAME,
    KEY_FILE, MAX_CERT_DAYS,
};
pub use config::Config;
pub use error::{Error, Result};
pub use fs::{atomic_write, atomic_write_secret, write_secret_file};
pub use server::{load_tls_config, run_server, SpaConfig};
pub use x509::{parse_cert_file, parse_cert_pem, verify_self_signed, CertInfo};

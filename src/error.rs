// Copyright 2025 The spaserve Authors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to generate private key: {0}")]
    KeyGen(String),

    #[error("Failed to generate serial number: {0}")]
    SerialGen(String),

    #[error("Certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("Invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Invalid validity period: {0}")]
    InvalidDays(String),

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind to {addr}: {reason}\nIs another process using this port?")]
    BindFailed { addr: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

// Copyright 2025 The spaserve Authors
// SPDX-License-Identifier: Apache-2.0

use crate::cert::{CertOptions, EcdsaCurve, KeyAlgorithm};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Settings for certificate issuance, read from `spaserve.toml` when present.
///
/// Every field has a default, so an empty or missing file yields a working
/// configuration: an RSA-2048 CA certificate for `localhost`, valid 365 days.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Comma-separated hostnames and IP addresses to place in the certificate.
    #[serde(default = "default_hosts")]
    pub hosts: String,
    /// How many days the certificate stays valid, starting now.
    #[serde(default = "default_validity_days")]
    pub validity_days: u32,
    /// Whether the certificate is marked as its own certificate authority.
    #[serde(default = "default_ca")]
    pub ca: bool,
    /// Key algorithm: "rsa" or "ecdsa".
    #[serde(default = "default_key_algorithm")]
    pub key_algorithm: String,
    /// RSA modulus size in bits. Only used when key_algorithm = "rsa".
    #[serde(default = "default_rsa_bits")]
    pub rsa_bits: u32,
    /// ECDSA curve: "p256" or "p384". Only used when key_algorithm = "ecdsa".
    #[serde(default = "default_ecdsa_curve")]
    pub ecdsa_curve: String,
}

fn default_hosts() -> String {
    "localhost".to_string()
}

fn default_validity_days() -> u32 {
    365
}

fn default_ca() -> bool {
    true
}

fn default_key_algorithm() -> String {
    "rsa".to_string()
}

fn default_rsa_bits() -> u32 {
    2048
}

fn default_ecdsa_curve() -> String {
    "p256".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            validity_days: default_validity_days(),
            ca: default_ca(),
            key_algorithm: default_key_algorithm(),
            rsa_bits: default_rsa_bits(),
            ecdsa_curve: default_ecdsa_curve(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Self::default()
        };

        // Validate config values
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        use crate::cert::validate_days;

        if self.hosts.trim().is_empty() {
            return Err(Error::Config(
                "hosts must name at least one hostname or IP address".into(),
            ));
        }

        validate_days(self.validity_days)?;

        match self.key_algorithm.as_str() {
            "rsa" => {
                if !matches!(self.rsa_bits, 2048 | 3072 | 4096) {
                    return Err(Error::Config(format!(
                        "rsa_bits must be 2048, 3072, or 4096, got {}",
                        self.rsa_bits
                    )));
                }
            }
            "ecdsa" => {
                if !matches!(self.ecdsa_curve.as_str(), "p256" | "p384") {
                    return Err(Error::Config(format!(
                        "ecdsa_curve must be \"p256\" or \"p384\", got \"{}\"",
                        self.ecdsa_curve
                    )));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "key_algorithm must be \"rsa\" or \"ecdsa\", got \"{}\"",
                    other
                )));
            }
        }

        Ok(())
    }

    /// Turn the validated settings into issuance options.
    pub fn cert_options(&self) -> CertOptions {
        let algorithm = match self.key_algorithm.as_str() {
            "ecdsa" => {
                let curve = match self.ecdsa_curve.as_str() {
                    "p384" => EcdsaCurve::P384,
                    _ => EcdsaCurve::P256,
                };
                KeyAlgorithm::Ecdsa { curve }
            }
            _ => KeyAlgorithm::Rsa {
                bits: self.rsa_bits,
            },
        };

        CertOptions {
            hosts: self.hosts.clone(),
            validity_days: self.validity_days,
            is_ca: self.ca,
            algorithm,
        }
    }
}

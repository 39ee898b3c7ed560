// Copyright 2025 The spaserve Authors
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use spaserve::{
    load_tls_config, parse_cert_file, run_server, Cert, Config, Error, Result, SpaConfig,
    CERT_FILE, KEY_FILE,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "spaserve")]
#[command(about = "Self-issuing HTTPS server for single-page apps")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    spaserve                          # Serve the current directory on https://localhost:5000
    spaserve --listen 8443            # Pick another port
    spaserve --spa dist/index.html    # Use a different fallback document

A fresh cert.pem and key.pem are written into the current directory on every
start. Issuance is tuned through spaserve.toml when present.")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "5000", value_parser = clap::value_parser!(u16).range(1..))]
    listen: u16,

    /// Page to deliver for an SPA
    #[arg(short, long, default_value = "index.html")]
    spa: PathBuf,

    /// Issuance settings file (a missing file means defaults)
    #[arg(short, long, default_value = "spaserve.toml")]
    config: PathBuf,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Show detailed output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
}

/// Output helper that respects --quiet and --verbose flags.
#[derive(Clone, Copy)]
struct Output {
    quiet: bool,
    verbose: bool,
}

impl Output {
    fn new(quiet: bool, verbose: bool) -> Self {
        Self { quiet, verbose }
    }

    /// Print a standard message (suppressed with --quiet)
    fn print(&self, msg: &str) {
        if !self.quiet {
            println!("{}", msg);
        }
    }

    /// Print a verbose message (only shown with --verbose)
    fn verbose(&self, msg: &str) {
        if self.verbose {
            println!("{}", msg);
        }
    }
}

fn main() {
    // Reset SIGPIPE to default behavior (exit) instead of panic
    // This prevents "broken pipe" panics when output is piped to tools like grep/head
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let out = Output::new(cli.quiet, cli.verbose);

    // Phase 1: issue a fresh certificate before anything listens
    let config = Config::load(&cli.config)?;
    let options = config.cert_options();

    out.verbose(&format!(
        "Issuing certificate for {} ({} days)",
        options.hosts, options.validity_days
    ));

    let cert = Cert::issue(&options)?;
    cert.save(Path::new("."))?;
    out.print(&format!("written {}", KEY_FILE));
    out.print(&format!("written {}", CERT_FILE));

    if cli.verbose {
        let info = parse_cert_file(Path::new(CERT_FILE))?;
        out.verbose(&format!(
            "Certificate covers {} and expires {}",
            cert.hosts.join(", "),
            info.expiry_string()
        ));
    }

    // Phase 2: serve over TLS until Ctrl+C
    let spa_config = SpaConfig {
        listen_port: cli.listen,
        root: PathBuf::from("."),
        spa_path: cli.spa,
    };

    out.print(&format!(
        "Starting webserver on https://localhost:{}...",
        cli.listen
    ));
    out.print("Press Ctrl+C to stop");

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Config(format!("Failed to create runtime: {}", e)))?;

    runtime.block_on(async {
        let tls_config = load_tls_config(Path::new(CERT_FILE), Path::new(KEY_FILE)).await?;
        run_server(spa_config, tls_config).await
    })
}

// Copyright (C) 2025 Paul Hampson
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License version 3 as  published by the
// Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

mod util;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use secure_bundle_format::BundleView;
use secure_bundle_host_core::{deliver, open_bundle, Bundler, KeyMaterial};

use crate::util::{read_binary_file, write_binary_file, LogLevel};

const DEFAULT_SECRETS_FILE: &str = "secret_build_output.txt";

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new AES key and MAC key
    Keygen {
        /// Secrets file read by `protect`
        #[arg(long, env = "FW_SECRETS_FILE", default_value = DEFAULT_SECRETS_FILE)]
        secrets: PathBuf,
        /// Also write the keys as a C header for the bootloader build
        #[arg(long)]
        header: Option<PathBuf>,
        /// Replace an existing secrets file
        #[arg(long)]
        force: bool,
    },
    /// Encrypt and authenticate a firmware image into a bundle
    Protect {
        /// Raw firmware image
        #[arg(long)]
        infile: PathBuf,
        /// Where to write the bundle
        #[arg(long)]
        outfile: PathBuf,
        /// Firmware version carried in the bundle
        #[arg(long)]
        version: u16,
        /// Release message shown by the device after the update
        #[arg(long)]
        message: String,
        /// Secrets file with the AES key and MAC key as hex lines
        #[arg(long, env = "FW_SECRETS_FILE", default_value = DEFAULT_SECRETS_FILE)]
        secrets: PathBuf,
    },
    /// Deliver a bundle to the bootloader over a serial port
    Update {
        /// Serial port the device is attached to
        #[arg(long, env = "FW_UPDATE_PORT")]
        port: String,
        /// Bundle written by `protect`
        #[arg(long)]
        firmware: PathBuf,
        #[arg(long, default_value_t = 115_200)]
        baud: u32,
        /// Read timeout for each acknowledgment
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
    /// Print the sections of a bundle, verifying it when secrets are given
    Inspect {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long, env = "FW_SECRETS_FILE")]
        secrets: Option<PathBuf>,
    },
    /// List available serial ports
    Ports,
}

/// Protects firmware images and delivers them to the bootloader.
#[derive(Debug, Parser)]
#[command(name = "fw-update")]
struct Cli {
    /// Log verbosity, overrides RUST_LOG. Defaults to info
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = cli.log_level {
        logger.filter_level(level.into());
    }
    logger.format_timestamp_millis().init();

    match cli.command {
        Command::Keygen {
            secrets,
            header,
            force,
        } => keygen(&secrets, header.as_deref(), force).context("Keygen command failed"),
        Command::Protect {
            infile,
            outfile,
            version,
            message,
            secrets,
        } => protect(&infile, &outfile, version, &message, &secrets)
            .context("Protect command failed"),
        Command::Update {
            port,
            firmware,
            baud,
            timeout_ms,
        } => update(&port, &firmware, baud, Duration::from_millis(timeout_ms))
            .context("Update command failed"),
        Command::Inspect { bundle, secrets } => {
            inspect(&bundle, secrets.as_deref()).context("Inspect command failed")
        }
        Command::Ports => list_ports(),
    }
}

fn load_keys(path: &Path) -> Result<KeyMaterial> {
    KeyMaterial::load(path).with_context(|| format!("Failed to load secrets from {}", path.display()))
}

fn keygen(secrets: &Path, header: Option<&Path>, force: bool) -> Result<()> {
    if secrets.exists() && !force {
        bail!(
            "{} already exists, bundles protected with it would no longer be accepted; use --force to replace it",
            secrets.display()
        );
    }

    let keys = KeyMaterial::generate();
    write_binary_file(secrets, keys.to_secrets().as_bytes())?;
    log::info!("Wrote new keys to {}", secrets.display());

    if let Some(header) = header {
        write_binary_file(header, keys.to_c_header().as_bytes())?;
        log::info!("Wrote bootloader key header to {}", header.display());
    }
    Ok(())
}

fn protect(infile: &Path, outfile: &Path, version: u16, message: &str, secrets: &Path) -> Result<()> {
    let keys = load_keys(secrets)?;
    let firmware = read_binary_file(infile)?;

    let bundle = Bundler::new(keys).build(&firmware, version, message)?;
    write_binary_file(outfile, bundle.as_bytes())?;

    log::info!(
        "Protected {} ({} bytes) as version {} into {} ({} bytes)",
        infile.display(),
        firmware.len(),
        version,
        outfile.display(),
        bundle.len()
    );
    Ok(())
}

fn update(port_name: &str, bundle_path: &Path, baud: u32, timeout: Duration) -> Result<()> {
    let bundle = read_binary_file(bundle_path)?;

    log::info!("Connecting to: {}", port_name);
    let mut serial = serialport::new(port_name, baud)
        .timeout(timeout)
        .open()
        .with_context(|| format!("Failed to open serial port {port_name}"))?;
    log::info!("Connected at {} baud, timeout {:?}", baud, timeout);

    // Give device time to initialize
    std::thread::sleep(Duration::from_millis(100));

    let summary = deliver(&mut *serial, &bundle)?;
    log::info!(
        "Update sent: {} frames in {} units, {} bytes",
        summary.frames,
        summary.units,
        summary.bytes_written
    );
    Ok(())
}

fn inspect(bundle_path: &Path, secrets: Option<&Path>) -> Result<()> {
    let bytes = read_binary_file(bundle_path)?;
    let view = BundleView::parse(&bytes).context("Bundle layout is invalid")?;

    for line in describe(&view) {
        println!("{line}");
    }

    if let Some(secrets) = secrets {
        let keys = load_keys(secrets)?;
        let opened = open_bundle(&bytes, &keys).context("Bundle failed verification")?;
        println!(
            "verified: version {}, {} bytes of firmware",
            opened.version,
            opened.firmware.len()
        );
    }
    Ok(())
}

fn describe(view: &BundleView<'_>) -> Vec<String> {
    let metadata = view.metadata;
    let mut lines = vec![
        format!("version: {}", metadata.version),
        format!("firmware size: {}", metadata.firmware_size),
        format!("message size: {}", metadata.message_size),
        format!("frames: {}", metadata.frame_count()),
    ];
    for frame in view.frames() {
        lines.push(format!(
            "  frame {}: {} bytes, version {}",
            frame.header.index, frame.header.size, frame.header.version
        ));
    }
    lines.push(format!("message: {}", String::from_utf8_lossy(view.message)));
    lines.push(format!("iv: {}", hex::encode(view.iv)));
    lines.push(format!("tag: {}", hex::encode(view.tag)));
    lines
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        bail!("No serial ports found");
    }
    for port in &ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

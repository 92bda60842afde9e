#![cfg(feature = "cli")]
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use base64::Engine;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, Level};

use rsmediadrm::callback::{LicenseClient, MediaDrmCallback};
use rsmediadrm::config::LicenseConfig;
use rsmediadrm::crypto::common_secret;
use rsmediadrm::key_uri::KeyUriSource;
use rsmediadrm::platform::KeyRequest;
use rsmediadrm::recovery::KeyRecovery;
use rsmediadrm::scheme::SchemeId;
use rsmediadrm::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "rsmediadrm", version, disable_version_flag = true, about = "rsmediadrm CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print the derived common secret as hex.
    Secret,
    /// Recover the wrapped key of a saved license response.
    Recover {
        /// JSON license response.
        response: PathBuf,
        #[arg(short = 'i', long = "device-id")]
        device_id: String,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Derive the content key addressed by a key URI.
    KeyUri {
        uri: String,
        #[arg(short = 'i', long = "device-id")]
        device_id: String,
    },
    /// Send a key request payload to the configured license endpoint.
    ///
    /// ClearKey responses are recovered before being written out.
    License {
        /// Raw key request payload.
        payload: PathBuf,
        #[arg(short = 'c', long = "config")]
        config: PathBuf,
        #[arg(short = 's', long = "scheme", default_value = "clearkey")]
        scheme: String,
        /// The payload file holds base64 text.
        #[arg(short = 'b', long = "base64", action = ArgAction::SetTrue)]
        base64: bool,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("rsmediadrm version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::Secret) => {
            println!("{}", hex::encode(common_secret()));
            Ok(())
        }
        Some(Commands::Recover {
            response,
            device_id,
            output,
        }) => run_recover(&response, &device_id, output.as_deref()),
        Some(Commands::KeyUri { uri, device_id }) => run_key_uri(&uri, &device_id),
        Some(Commands::License {
            payload,
            config,
            scheme,
            base64,
            output,
        }) => run_license(&payload, &config, &scheme, base64, output.as_deref()),
        None => Ok(()),
    }
}

fn run_recover(response: &Path, device_id: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let data = std::fs::read(response)
        .with_context(|| format!("Failed to read {}", response.display()))?;
    let recovery = KeyRecovery::new(device_id);
    let recovered = recovery.recover(&data).context("Key recovery failed")?;
    info!("[+] Recovered license response for device {}", recovery.device_id());
    write_output(&recovered, output)
}

fn run_key_uri(uri: &str, device_id: &str) -> anyhow::Result<()> {
    let mut source = KeyUriSource::new(device_id);
    let len = source.open(uri).context("Failed to derive key")?;
    let mut key = vec![0u8; len];
    let read = source.read_into(&mut key, 0, len)?.unwrap_or(0);
    source.close();
    info!("[+] Derived {} byte key", read);
    println!("{}", hex::encode(&key[..read]));
    Ok(())
}

fn run_license(
    payload: &Path,
    config_path: &Path,
    scheme: &str,
    is_base64: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let config = LicenseConfig::from_path(config_path)?;
    info!("[+] Loaded config from {}", config_path.display());
    let scheme = SchemeId::from_str(scheme)?;

    let mut data = std::fs::read(payload)
        .with_context(|| format!("Failed to read {}", payload.display()))?;
    if is_base64 {
        let text = String::from_utf8(data).context("Payload is not base64 text")?;
        data = base64::engine::general_purpose::STANDARD
            .decode(text.trim())
            .context("Payload is not valid base64")?;
    }

    let transport = HttpTransport::new(config.user_agent.as_deref())?;
    let client = LicenseClient::new(transport, &config);
    let request = KeyRequest {
        data,
        default_url: String::new(),
    };
    let response = client.execute_key_request(scheme, &request)?;
    info!("[+] Got {} license response ({} bytes)", scheme, response.len());
    write_output(&response, output)
}

fn write_output(data: &[u8], output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("[+] Saved to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

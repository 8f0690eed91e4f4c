//! Command-line arguments and layered configuration

use std::path::PathBuf;

use clap::Parser;
use config::{Config, Environment, File};
use xsts_auth::XstsConfig;

/// Game service host protected by XSTS token validation
#[derive(Debug, Parser)]
#[command(name = "xsts-demo", version, about)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "XSTS_DEMO_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: String,

    /// Optional TOML configuration file; `XSTS__*` variables override it
    #[arg(short, long, env = "XSTS_DEMO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Relying-party certificate (PEM)
    #[arg(long, env = "XSTS_DEMO_RP_CERT")]
    pub rp_cert: PathBuf,

    /// Relying-party private key (PEM)
    #[arg(long, env = "XSTS_DEMO_RP_KEY")]
    pub rp_key: PathBuf,

    /// Business-partner certificate (PEM)
    #[arg(long, env = "XSTS_DEMO_BP_CERT")]
    pub bp_cert: PathBuf,

    /// Business-partner private key (PEM)
    #[arg(long, env = "XSTS_DEMO_BP_KEY")]
    pub bp_key: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// Load the trust layer configuration
///
/// Defaults come from [`XstsConfig::default`]; the optional file and then the
/// environment override individual keys.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a value has the wrong type.
pub fn load(path: Option<&PathBuf>) -> Result<XstsConfig, config::ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }
    builder
        .add_source(Environment::with_prefix("XSTS").separator("__").try_parsing(true))
        .build()?
        .try_deserialize()
}

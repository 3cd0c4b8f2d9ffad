use clap::Parser;

/// Reverse-proxy API gateway.
#[derive(Parser)]
#[command(name = "vibeway-gateway", version, about)]
pub struct Cli {
    /// Path to the gateway's YAML config document.
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<String>,
}

use clap::Parser;

/// Process bootstrap flags (§4.13). There is no instance-management
/// subcommand surface here; configuration of providers, models and
/// policies lives entirely in the YAML file.
#[derive(Parser, Debug)]
#[command(name = "keyrelay")]
pub struct Cli {
    #[arg(long, env = "KEYRELAY_CONFIG", default_value = "./config.yaml")]
    pub config: String,

    #[arg(long, env = "KEYRELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "KEYRELAY_PORT", default_value_t = 8080)]
    pub port: u16,
}

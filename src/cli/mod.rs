pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "demeter")]
#[command(about = "Demeter CLI - development tooling for the Demeter API")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, conflicts_with = "json", help = "Output in human-readable text format")]
    pub text: bool,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Mint a signed JWT for local testing")]
    Token(commands::token::TokenArgs),

    #[command(about = "Print the effective configuration")]
    Config,

    #[command(about = "Check out a connection, bind a tenant and ping the database")]
    Ping(commands::ping::PingArgs),
}

/// Default format when neither `--text` nor `--json` is given
pub const OUTPUT_ENV: &str = "DEMETER_OUTPUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        Self::resolve(cli.text, cli.json, std::env::var(OUTPUT_ENV).ok().as_deref())
    }

    /// Flags win over the environment default
    fn resolve(text: bool, json: bool, env_default: Option<&str>) -> Self {
        match (text, json) {
            (true, _) => OutputFormat::Text,
            (_, true) => OutputFormat::Json,
            _ => match env_default.map(str::trim) {
                Some(v) if v.eq_ignore_ascii_case("json") => OutputFormat::Json,
                _ => OutputFormat::Text,
            },
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);
    let config = crate::config::config();

    match cli.command {
        Commands::Token(args) => commands::token::handle(args, config, output_format),
        Commands::Config => commands::config::handle(config, output_format),
        Commands::Ping(args) => commands::ping::handle(args, config, output_format).await,
    }
}

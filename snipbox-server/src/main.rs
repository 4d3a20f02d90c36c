use anyhow::Result;
use clap::Parser;
use snipbox_server::{run_server_app, ServerArgs};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "snipbox-server")]
#[command(about = "Run and share code snippets over HTTP")]
#[command(version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "SNIPBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Wall-clock limit per run, e.g. "10s" or "1m"
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Runs allowed to execute at once
    #[arg(long)]
    pub max_concurrent_runs: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl From<Args> for ServerArgs {
    fn from(args: Args) -> Self {
        ServerArgs {
            config_path: args.config,
            bind_address: args.bind,
            port: args.port,
            timeout: args.timeout,
            max_concurrent_runs: args.max_concurrent_runs,
            verbose: args.verbose,
            log_file: args.log_file,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    run_server_app(args.into()).await
}

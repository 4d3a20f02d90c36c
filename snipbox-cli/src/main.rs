mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::RunOutcome;
use snipbox_server::{init_tracing, run_server_app, ServerArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snipbox")]
#[command(about = "Run Python snippets in a sandbox and share them")]
#[command(version)]
pub struct Cli {
    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// TOML configuration file
        #[arg(short, long, env = "SNIPBOX_CONFIG")]
        config: Option<PathBuf>,

        /// Address to listen on
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Also write logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Run a program, locally or on a server
    Run {
        /// Program file, or - for stdin
        file: String,

        /// File whose contents become the program's stdin
        #[arg(short, long)]
        stdin: Option<PathBuf>,

        /// Server base URL; runs locally when omitted
        #[arg(short, long, env = "SNIPBOX_URL")]
        url: Option<String>,

        /// Run timeout in seconds for local runs. With --url the server
        /// keeps its own timeout and this only bounds how long to wait.
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Configuration file for local runs
        #[arg(short, long, env = "SNIPBOX_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Share a program and print its id
    Save {
        /// Program file, or - for stdin
        file: String,

        /// Server base URL
        #[arg(short, long, env = "SNIPBOX_URL", default_value = "http://localhost:5000")]
        url: String,
    },
    /// Print a shared program
    Fetch {
        /// Snippet id
        id: String,

        /// Server base URL
        #[arg(short, long, env = "SNIPBOX_URL", default_value = "http://localhost:5000")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    // serve installs its own subscriber with the log file
    let _guard = match &cli.command {
        Commands::Serve { .. } => None,
        _ if verbose => init_tracing(true, None),
        _ => None,
    };

    match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            log_file,
        } => {
            let args = ServerArgs {
                config_path: config,
                bind_address: bind,
                port,
                verbose,
                log_file,
                ..Default::default()
            };
            run_server_app(args).await
        }
        Commands::Run {
            file,
            stdin,
            url,
            timeout,
            config,
        } => {
            let code = commands::read_source(&file).await?;
            let input = match stdin {
                Some(path) => tokio::fs::read_to_string(&path).await?,
                None => String::new(),
            };
            let outcome = match url {
                Some(url) => commands::execute_remote_run(&url, code, input, timeout).await?,
                None => {
                    commands::execute_local_run(code, input, timeout, config.as_deref()).await?
                }
            };
            print_run_outcome(outcome);
            Ok(())
        }
        Commands::Save { file, url } => {
            let code = commands::read_source(&file).await?;
            let id = commands::execute_save(&url, code).await?;
            println!("{}", id);
            Ok(())
        }
        Commands::Fetch { id, url } => {
            let code = commands::execute_fetch(&url, &id).await?;
            print!("{}", code);
            if !code.ends_with('\n') {
                println!();
            }
            Ok(())
        }
    }
}

fn print_run_outcome(outcome: RunOutcome) {
    match outcome {
        RunOutcome::Output(output) => print!("{}", output),
        RunOutcome::Error(error) => {
            eprint!("{}", error);
            if !error.ends_with('\n') {
                eprintln!();
            }
            std::process::exit(1);
        }
    }
}

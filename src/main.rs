#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};
use wa_sessiond::{daemon, send, Config};

/// `wa-sessiond` - many messaging sessions, one process.
#[derive(Parser, Debug)]
#[command(name = "wa-sessiond")]
#[command(version)]
#[command(about = "Multi-session messaging gateway with durable credential backup.", long_about = None)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(short, long, global = true, default_value = "wa-sessiond.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control API and session manager until Ctrl+C
    Serve {
        /// Port to listen on; defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one text message through a linked session and exit
    Send {
        /// Session whose local credentials are used
        #[arg(short, long)]
        session: String,

        /// Recipient number (digits) or full JID
        number: String,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - respects RUST_LOG env var, defaults to INFO for this crate
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wa_sessiond=info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            tracing::info!(
                "Starting wa-sessiond on {}:{}",
                config.gateway.host,
                config.gateway.port
            );
            daemon::run(config).await
        }

        Commands::Send {
            session,
            number,
            message,
        } => {
            let text = message.join(" ");
            let message_id = send::run(&config, &session, &number, &text).await?;
            println!("{message_id}");
            Ok(())
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;

use quill::{init_tracing, AppConfig, ChatSession, Repl};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Research a topic on the web and write an HTML blog post about it")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (default: quill.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the blog writer in the terminal
    Chat {
        /// Write the latest generated HTML post to this file
        #[arg(long)]
        html_out: Option<PathBuf>,
    },
    /// Serve the HTTP chat API
    #[cfg(feature = "server")]
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List the tools the agent can call
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.logging);

    match cli.command.unwrap_or(Commands::Chat { html_out: None }) {
        Commands::Chat { html_out } => run_chat(&config, html_out).await,
        #[cfg(feature = "server")]
        Commands::Serve { host, port } => {
            let mut server = config.server.clone();
            if let Some(host) = host {
                server.host = host;
            }
            if let Some(port) = port {
                server.port = port;
            }
            let addr: std::net::SocketAddr = format!("{}:{}", server.host, server.port)
                .parse()
                .with_context(|| format!("invalid listen address {}:{}", server.host, server.port))?;
            run_server(&config, addr).await
        }
        Commands::Tools => list_tools(&config).await,
    }
}

async fn run_chat(config: &AppConfig, html_out: Option<PathBuf>) -> Result<()> {
    println!("Initializing chat...");
    let session = ChatSession::from_config(config).await?;

    let mut repl = Repl::new(&session);
    if let Some(path) = html_out {
        repl = repl.with_html_out(path);
    }
    let result = repl
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    session.shutdown().await;
    result?;
    Ok(())
}

#[cfg(feature = "server")]
async fn run_server(config: &AppConfig, addr: std::net::SocketAddr) -> Result<()> {
    use std::sync::Arc;

    use quill::ChatServer;
    use tracing::info;

    info!(%addr, provider = %config.model.provider, model = %config.model.model, "starting quill server");
    let session = Arc::new(ChatSession::from_config(config).await?);
    ChatServer::new(session).serve(addr).await?;
    Ok(())
}

async fn list_tools(config: &AppConfig) -> Result<()> {
    let (registry, connections) = quill::connect_tools(config).await?;
    println!("{}", serde_json::to_string_pretty(&registry.describe())?);
    for connection in &connections {
        connection.close().await?;
    }
    Ok(())
}

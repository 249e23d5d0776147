use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pixbox")]
#[command(about = "On-the-fly image delivery server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Server(ServerArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// Address to bind the HTTP server to, overriding the configured value
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

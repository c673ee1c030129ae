//! Command-line interface definitions and parsing

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline SOS mesh node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an interactive node on the local network
    Node {
        /// Directory holding the message store
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        /// Address links listen on
        #[arg(short, long)]
        listen: Option<IpAddr>,
        /// Do not join the local discovery group
        #[arg(long)]
        no_discovery: bool,
    },
    /// Decode a pairing code and print what it carries
    Decode {
        /// Code as shown by another device
        code: String,
    },
    /// Pair a line of in-memory nodes and flood one SOS through it
    Simulate {
        /// Number of nodes in the line
        #[arg(short, long, default_value_t = 4)]
        nodes: usize,
        /// Text of the flooded message
        #[arg(short, long, default_value = "SOS - simulated emergency")]
        text: String,
    },
}

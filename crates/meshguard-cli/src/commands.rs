//! Command handlers for the MeshGuard CLI

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use meshguard_core::protocol::codec;
use meshguard_core::transport::SharedAnnouncementMedium;
use meshguard_core::FixedLocation;
use meshguard_runtime::{
    FileStorage, RuntimeBuilder, RuntimeHandle, TcpLinkFactory, UdpAnnouncementMedium,
};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::{render_event, render_message, LineCommand, ParseError, HELP};
use crate::simulate;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Node {
                data_dir,
                listen,
                no_discovery,
            } => {
                let mut config = config;
                if let Some(dir) = data_dir {
                    config.node.data_dir = Some(dir);
                }
                if let Some(address) = listen {
                    config.node.listen = address;
                }
                if no_discovery {
                    config.mesh.membership.discovery_enabled = false;
                }
                Self::handle_node_command(config).await
            }
            Commands::Decode { code } => Self::handle_decode_command(&code),
            Commands::Simulate { nodes, text } => simulate::run(nodes, &text).await,
        }
    }

    /// Run an interactive node until `quit` or Ctrl+C
    async fn handle_node_command(config: AppConfig) -> Result<()> {
        let store_path = config.store_path();
        let storage = FileStorage::open(&store_path)
            .await
            .with_context(|| format!("opening message store {}", store_path.display()))?;
        info!("message store at {}", storage.path().display());

        let advertise = config.advertise_address();
        let factory = TcpLinkFactory::new(config.node.listen, advertise);
        info!("links listen on {}, advertised as {}", config.node.listen, advertise);

        let mut builder = RuntimeBuilder::new(config.mesh.clone())
            .with_link_factory(Arc::new(factory))
            .with_storage(Arc::new(storage));
        if config.mesh.membership.discovery_enabled {
            match UdpAnnouncementMedium::bind(config.discovery.clone()).await {
                Ok(medium) => {
                    let medium: SharedAnnouncementMedium = Arc::new(medium);
                    builder = builder.with_announcement_medium(medium);
                }
                Err(e) => warn!("discovery disabled, could not join group: {}", e),
            }
        }
        if let Some(location) = config.node.location {
            builder = builder.with_location(Arc::new(FixedLocation(location)));
        }
        let mut runtime = builder
            .build_and_start()
            .await
            .context("starting the node")?;

        let mut events = runtime.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Some(text) = render_event(&event) {
                            println!("{text}");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("display skipped {} event(s)", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        println!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            prompt(&config.cli.prompt);
            let line = tokio::select! {
                line = lines.next_line() => line.context("reading stdin")?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };

            match LineCommand::parse(&line) {
                Ok(LineCommand::Quit) => break,
                Ok(command) => {
                    if let Err(e) = Self::run_line_command(&runtime, command).await {
                        println!("error: {e:#}");
                    }
                }
                Err(ParseError::Empty) => {}
                Err(e) => println!("{e}"),
            }
        }

        runtime.shutdown().await?;
        printer.abort();
        Ok(())
    }

    async fn run_line_command(runtime: &RuntimeHandle, command: LineCommand) -> Result<()> {
        match command {
            LineCommand::Offer => runtime.start_initiation().await?,
            LineCommand::Scan => runtime.scan_answer().await?,
            LineCommand::Submit(code) => runtime.submit_peer_signal(code).await?,
            LineCommand::Reset => runtime.reset().await?,
            LineCommand::Sos(text) => {
                let message = runtime.send(text, false).await?;
                println!("{} {}", message.status, message.id);
            }
            LineCommand::Test => {
                let message = runtime.send_test().await?;
                println!("{} {}", message.status, message.id);
            }
            LineCommand::Peers => {
                let peers = runtime.connected_peer_ids();
                if peers.is_empty() {
                    println!("no peers connected");
                }
                for peer in peers {
                    println!("  {peer}");
                }
            }
            LineCommand::Messages => {
                let messages = runtime.messages().await?;
                if messages.is_empty() {
                    println!("no messages");
                }
                for message in messages {
                    println!("  {}", render_message(&message));
                }
            }
            LineCommand::Status => runtime.request_status().await?,
            LineCommand::Help => println!("{HELP}"),
            LineCommand::Quit => {}
        }
        Ok(())
    }

    /// Print what a pairing code carries
    fn handle_decode_command(code: &str) -> Result<()> {
        let signal = codec::decode(code).context("invalid code format")?;
        println!("kind:        {}", signal.kind);
        if signal.is_degenerate() {
            println!("(code carries no credentials)");
            return Ok(());
        }
        println!("ufrag:       {}", signal.ice_ufrag);
        println!("fingerprint: {}", signal.fingerprint);
        println!("candidates:  {}", signal.candidates.len());
        for candidate in &signal.candidates {
            println!("  {candidate}");
        }
        println!();
        print!("{}", signal.to_description().sdp);
        Ok(())
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

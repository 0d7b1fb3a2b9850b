#![allow(clippy::cargo_common_metadata)]

use std::ops::ControlFlow;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{error, info, LevelFilter};
use push_peers::{
    CallConfig, Envelope, MessageHandler, PeerIdentity, Rendezvous, SessionId, SignalSink,
    SignalingChannel, Step, Transport, TransportConfig, UreqConnector,
};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session id shared by both peers.
    #[arg(short, long, env = "PUSH_PEERS_SESSION_ID")]
    session: String,
    /// Relay base URL.
    #[arg(long, env = "PUSH_PEERS_TOPIC_BASE")]
    topic_base: Option<String>,
    /// Prefix put in front of the session id to form the topic name.
    #[arg(long, env = "PUSH_PEERS_TOPIC_PREFIX")]
    topic_prefix: Option<String>,
    /// More output per occurrence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one message as a fresh identity.
    Publish { text: String },
    /// Print every message published by someone else.
    Listen,
    /// Pair with a peer and report which side creates the offer.
    Rendezvous {
        /// Seconds to wait for a peer.
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )?;

    let channel = open_channel(&cli)?;
    match cli.command {
        Command::Publish { ref text } => {
            channel.publish(text)?;
            info!("published to {}", channel.urls().publish);
        }
        Command::Listen => listen(&channel)?,
        Command::Rendezvous { timeout } => rendezvous(&channel, Duration::from_secs(timeout))?,
    }
    Ok(())
}

fn open_channel(cli: &Cli) -> Result<SignalingChannel<UreqConnector>> {
    let mut config = CallConfig::new(SessionId::new(cli.session.clone()));
    if let Some(base) = &cli.topic_base {
        config.topic_base = base.clone();
    }
    if let Some(prefix) = &cli.topic_prefix {
        config.topic_prefix = prefix.clone();
    }
    config.validate()?;
    let transport_config =
        TransportConfig::from_env().context("reading PUSH_PEERS_HTTP_* settings")?;

    let identity = PeerIdentity::generate();
    info!("running as {identity}");
    Ok(SignalingChannel::new(
        Transport::new(transport_config),
        config.topic_urls(),
        identity,
    ))
}

struct Printer;

impl MessageHandler for Printer {
    fn on_started(&mut self, success: bool, _sink: &dyn SignalSink) {
        if success {
            info!("listening");
        }
    }

    fn on_message(&mut self, envelope: Envelope, _sink: &dyn SignalSink) {
        println!("{}: {}", envelope.sender, envelope.body);
    }
}

fn listen(channel: &SignalingChannel<UreqConnector>) -> Result<()> {
    let interrupted = AtomicBool::new(false);
    let completion = channel.subscribe(&mut Printer, &interrupted)?;
    info!("stream ended: {completion:?}");
    Ok(())
}

struct Pairing {
    rendezvous: Rendezvous,
    deadline: Instant,
    offerer: Option<bool>,
}

impl MessageHandler for Pairing {
    fn on_started(&mut self, success: bool, sink: &dyn SignalSink) {
        if !success {
            return;
        }
        if let Err(err) = self.rendezvous.begin(sink) {
            error!("failed to send SYN: {err}");
        }
    }

    fn on_message(&mut self, envelope: Envelope, sink: &dyn SignalSink) {
        if let Step::Connected { offerer } = self.rendezvous.on_message(envelope, sink) {
            self.offerer = Some(offerer);
        }
    }

    fn on_tick(&mut self, _sink: &dyn SignalSink) -> ControlFlow<()> {
        if self.offerer.is_some() || Instant::now() >= self.deadline {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

fn rendezvous(channel: &SignalingChannel<UreqConnector>, timeout: Duration) -> Result<()> {
    let mut pairing = Pairing {
        rendezvous: Rendezvous::new(channel.identity().clone()),
        deadline: Instant::now() + timeout,
        offerer: None,
    };
    let interrupted = AtomicBool::new(false);
    channel.subscribe(&mut pairing, &interrupted)?;

    let (Some(offerer), Some(remote)) = (pairing.offerer, pairing.rendezvous.remote()) else {
        bail!("no peer showed up within {}s", timeout.as_secs());
    };
    println!("peer: {remote}");
    println!("offerer: {}", if offerer { "this side" } else { "remote side" });
    Ok(())
}

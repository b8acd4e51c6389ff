//! serial_probe - exercise the controller link without a camera.
//!
//! Opens the controller port (given or discovered), sends each command
//! from the command line in order and logs whatever the controller echoes
//! back during a short listening window.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::{Duration, Instant};

use line_follower::transport::{
    discover_port, SendOutcome, SerialConfig, SerialOpener, SerialSession,
};
use line_follower::Command;

const ECHO_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Send steering commands to the robot controller and show its replies"
)]
struct Args {
    /// Controller serial port; discovered when omitted.
    #[arg(long, env = "LINE_FOLLOWER_SERIAL_PORT")]
    port: Option<String>,

    #[arg(long, default_value = "115200")]
    baud_rate: u32,

    /// Pause between commands.
    #[arg(long, default_value = "250")]
    interval_ms: u64,

    /// How long to keep reading echoes after the last command.
    #[arg(long, default_value = "1000")]
    listen_ms: u64,

    /// Commands to send: forward, left, right, stop.
    #[arg(required = true)]
    commands: Vec<Command>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let port = match args.port {
        Some(port) => port,
        None => discover_port()?
            .ok_or_else(|| anyhow!("no controller port found; pass --port"))?,
    };
    let config = SerialConfig {
        baud_rate: args.baud_rate,
        ..SerialConfig::new(port)
    };

    let mut session = SerialSession::new();
    session.open(&SerialOpener::new(config))?;
    let interval = Duration::from_millis(args.interval_ms);

    for command in &args.commands {
        match session.send(*command)? {
            SendOutcome::Sent(command) => log::info!("sent {}", command),
            SendOutcome::TimedOut(command) => log::warn!("timed out sending {}", command),
        }
        listen(&mut session, interval)?;
    }
    listen(&mut session, Duration::from_millis(args.listen_ms))?;

    session.close();
    Ok(())
}

fn listen(session: &mut SerialSession, window: Duration) -> Result<()> {
    let deadline = Instant::now() + window;
    while Instant::now() < deadline {
        if let Some(text) = session.poll_echo()? {
            log::info!("controller: {}", text);
        }
        std::thread::sleep(ECHO_POLL_INTERVAL);
    }
    Ok(())
}

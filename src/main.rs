use bfdd::session::defaults::{PORT_ECHO, PORT_MULTI_HOP, PORT_SINGLE_HOP};
use bfdd::{
    run_udp_listener, Command, Config, Daemon, LogSink, SysfsResolver, UdpSocketProvider,
};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bfdd", about = "BFD liveness detection daemon", version)]
struct Args {
    /// Configuration file. Overrides the standard search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log more. Repeat for debug output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "bfdd=info",
        1 => "bfdd=debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let (config, loaded) = match &args.config {
        Some(path) => match Config::load_file(path) {
            Ok(config) => (config, vec![path.clone()]),
            Err(e) => {
                error!(error = %e, "cannot load configuration");
                std::process::exit(1);
            }
        },
        None => match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "cannot load configuration");
                std::process::exit(1);
            }
        },
    };
    if loaded.is_empty() {
        info!("no configuration files found, starting empty");
    } else {
        for path in &loaded {
            info!(path = %path.display(), "configuration loaded");
        }
    }

    let (packet_tx, packet_rx) = mpsc::channel(1024);
    let (command_tx, command_rx) = mpsc::channel(64);

    let listen = config
        .daemon
        .listen
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let mut ports = vec![PORT_SINGLE_HOP, PORT_MULTI_HOP];
    if config.daemon.echo_listener {
        ports.push(PORT_ECHO);
    }
    for port in ports {
        let tx = packet_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_udp_listener(listen, port, tx).await {
                error!(port, error = %e, "listener failed");
            }
        });
    }

    for profile in config.peers() {
        if command_tx.send(Command::Apply(profile.clone())).await.is_err() {
            warn!("command channel closed during startup");
        }
    }

    let mut daemon = Daemon::new(
        Box::new(UdpSocketProvider::new()),
        Box::new(SysfsResolver::new()),
        Box::new(LogSink),
    );

    tokio::select! {
        _ = daemon.run(packet_rx, command_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    info!(sessions = daemon.session_count(), "stopped");
}

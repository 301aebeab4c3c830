//! `fieldctl serve`: answer requests from a register bank

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voltage_fieldbus::transport::open_serial;
use voltage_fieldbus::{
    CommandHandler, DatagramListener, FieldbusConfig, IoTransport, ListenerOptions, Protocol,
    SessionStats, StreamListener, TransportSettings, UdpTransport,
};

use crate::bank::{Presets, RegisterBank};
use crate::shutdown::cancel_on_signal;

/// Serve until Ctrl+C or SIGTERM
pub async fn run(config: &FieldbusConfig, size: usize, presets: &Presets) -> Result<()> {
    config.validate_server().context("Invalid server configuration")?;

    let handler: Arc<dyn CommandHandler> = Arc::new(RegisterBank::with_presets(size, presets)?);
    let protocol = config.protocol();
    let options = config.listener_options();

    let token = CancellationToken::new();
    let signal_watch = tokio::spawn(cancel_on_signal(token.clone()));

    info!(
        "Serving unit {} ({} framing, {} elements per table) on {}",
        protocol.address(),
        protocol.framing(),
        size,
        config.transport
    );

    match &config.transport {
        TransportSettings::Tcp { .. } => {
            let addr = bind_address(&config.transport)?;
            let listener = TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            let sessions = accept_loop(listener, protocol, options, handler, token.clone()).await?;
            info!("Stopped after {} session(s)", sessions);
        },
        TransportSettings::Udp { .. } => {
            let addr = bind_address(&config.transport)?;
            let socket = UdpTransport::bind(&addr).await?;
            let stats = DatagramListener::new(socket, protocol, handler)
                .with_options(options)
                .spawn_with_token(token.clone())
                .join()
                .await?;
            report("udp", &stats);
        },
        TransportSettings::Serial(serial) => {
            let port = open_serial(serial)?;
            let stats = StreamListener::serial(port, protocol, handler)
                .with_options(options)
                .spawn_with_token(token.clone())
                .join()
                .await?;
            report(&serial.device, &stats);
        },
    }

    // Also ends the watcher when the listener stopped on its own
    token.cancel();
    match signal_watch.await {
        Ok(Some(signal)) => info!("Stopped by {}", signal),
        Ok(None) => info!("Listener stopped"),
        Err(e) => warn!("Signal watcher failed: {}", e),
    }
    Ok(())
}

fn bind_address(settings: &TransportSettings) -> Result<String> {
    settings
        .socket_address()
        .with_context(|| format!("{settings} has no socket address"))
}

/// Accept connections until cancelled, one stream listener each
///
/// Returns the number of sessions served. Sessions still open when the token
/// fires are cancelled through child tokens and awaited.
pub async fn accept_loop(
    listener: TcpListener,
    protocol: Protocol,
    options: ListenerOptions,
    handler: Arc<dyn CommandHandler>,
    token: CancellationToken,
) -> Result<usize> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    let mut sessions: JoinSet<(SocketAddr, voltage_fieldbus::Result<SessionStats>)> =
        JoinSet::new();
    let mut accepted_count = 0;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    },
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY on {}: {}", peer, e);
                }
                info!("Connection from {}", peer);
                accepted_count += 1;

                let handle = StreamListener::new(IoTransport::new(stream), protocol.clone(), Arc::clone(&handler))
                    .with_options(options)
                    .spawn_with_token(token.child_token());
                sessions.spawn(async move { (peer, handle.join().await) });
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                log_session(finished);
            },
        }
    }

    while let Some(finished) = sessions.join_next().await {
        log_session(finished);
    }
    Ok(accepted_count)
}

fn log_session(
    finished: std::result::Result<(SocketAddr, voltage_fieldbus::Result<SessionStats>), tokio::task::JoinError>,
) {
    match finished {
        Ok((peer, Ok(stats))) => report(&peer.to_string(), &stats),
        Ok((peer, Err(e))) => warn!("Session {} failed: {}", peer, e),
        Err(e) => warn!("Session task failed: {}", e),
    }
}

fn report(source: &str, stats: &SessionStats) {
    info!(
        "{}: served={} ignored={} exceptions={} rx={}B",
        source, stats.frames_served, stats.frames_ignored, stats.exceptions_sent, stats.bytes_received
    );
}

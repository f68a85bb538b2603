//! Command handling for fixonce-relay.
//!
//! `run` starts the daemon; the other commands are one-shot operations on
//! the admission state or the memory service.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::admission::{AdmissionPolicy, FileStore, WhitelistScope};
use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::delivery::MemoryServiceClient;
use crate::queue::BatchQueue;
use crate::relay::{RelaySocketServer, DEFAULT_RELAY_CAPACITY};
use crate::telemetry::{self, AuditEvent};

/// Run the command selected on the command line.
pub fn handle_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Run => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;
            rt.block_on(run_daemon(config))
        }
        Commands::Check { origin } => {
            let decision = open_policy(config).is_allowed(origin);
            let state = if decision.allowed { "on" } else { "off" };
            println!("{}: capture {} ({})", origin, state, decision.reason);
            Ok(())
        }
        Commands::Allow { origin, session } => {
            let scope = if *session {
                WhitelistScope::Session
            } else {
                WhitelistScope::Permanent
            };
            let changed = open_policy(config)
                .add_to_whitelist(origin, scope)
                .with_context(|| format!("Failed to whitelist {}", origin))?;
            if changed {
                println!("Capture enabled for {} ({:?})", origin, scope);
            } else {
                println!("{} is already whitelisted", origin);
            }
            Ok(())
        }
        Commands::Disallow { origin } => {
            let changed = open_policy(config)
                .remove_from_whitelist(origin)
                .with_context(|| format!("Failed to remove {}", origin))?;
            if changed {
                println!("Capture disabled for {}", origin);
            } else {
                println!("{} was not whitelisted", origin);
            }
            Ok(())
        }
        Commands::List => {
            let state = open_policy(config)
                .snapshot()
                .context("Failed to read admission state")?;
            println!("Permanent:");
            for origin in &state.whitelist {
                println!("  {}", origin);
            }
            println!("Session:");
            for origin in &state.session_whitelist {
                println!("  {}", origin);
            }
            Ok(())
        }
        Commands::Ping => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;
            rt.block_on(ping(config))
        }
    }
}

fn open_policy(config: &Config) -> AdmissionPolicy {
    let path = config.admission.state_path_or_default();
    debug!("Admission state at {:?}", path);
    AdmissionPolicy::from_config(&config.admission, Arc::new(FileStore::new(path)))
}

async fn ping(config: &Config) -> Result<()> {
    let client = MemoryServiceClient::from_config(&config.server);
    let port = client
        .discover()
        .await
        .context("Memory service not found")?;
    println!("FixOnce memory service on {}:{}", config.server.host_or_default(), port);

    match client.handshake().await {
        Ok(ack) => println!("Handshake: {}", ack.status),
        Err(e) => println!("Handshake not supported: {}", e),
    }
    Ok(())
}

/// Run the relay daemon until Ctrl-C.
async fn run_daemon(config: &Config) -> Result<()> {
    let policy = Arc::new(open_policy(config));
    policy
        .begin_session()
        .context("Failed to reset session whitelist")?;

    let started = Instant::now();
    telemetry::record(AuditEvent::SessionStart {
        user: whoami(),
        pid: std::process::id(),
    });

    let client = MemoryServiceClient::from_config(&config.server);
    match client.discover().await {
        Ok(port) => info!("Delivering to memory service on port {}", port),
        Err(e) => warn!("{}; records will queue until it appears", e),
    }

    let queue_config = config
        .queue
        .to_queue_config(config.server.request_timeout());
    let queue = BatchQueue::new(client, queue_config);

    let socket_path = config.server.socket_path_or_default();
    let server = RelaySocketServer::bind(&socket_path)
        .with_context(|| format!("Failed to bind relay socket at {:?}", socket_path))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (relay_tx, relay_rx) = mpsc::channel(DEFAULT_RELAY_CAPACITY);

    let coordinator = Coordinator::new(Arc::clone(&policy), queue.clone());
    let mut status = coordinator.status();

    let probe = queue.spawn_probe(shutdown_rx.clone());
    let serving = tokio::spawn(server.serve(relay_tx, shutdown_rx.clone()));
    let coordinating = tokio::spawn(coordinator.run(relay_rx, shutdown_rx));

    info!("Relay running on {:?}; press Ctrl-C to stop", socket_path);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            Ok(()) = status.changed() => {
                let current = status.borrow_and_update().clone();
                if let Some(origin) = &current.origin {
                    info!(
                        "{}: {} ({}, server {})",
                        origin,
                        current.badge(),
                        current.decision.reason,
                        if current.server_reachable { "up" } else { "down" }
                    );
                }
            }
        }
    }

    info!("Shutting down relay");
    // Receivers may already be gone if a task ended early.
    let _ = shutdown_tx.send(true);

    match serving.await {
        Ok(Err(e)) => warn!("Relay socket stopped with error: {}", e),
        Err(e) => warn!("Relay socket task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = coordinating.await {
        warn!("Coordinator task failed: {}", e);
    }
    if let Err(e) = probe.await {
        warn!("Probe task failed: {}", e);
    }

    if !queue.is_empty() {
        info!("Flushing {} pending records", queue.len());
        queue.flush().await;
        if !queue.is_empty() {
            warn!("{} records were not delivered", queue.len());
        }
    }

    telemetry::record(AuditEvent::SessionEnd {
        user: whoami(),
        duration_sec: started.elapsed().as_secs(),
    });
    Ok(())
}

/// Get the current username for audit logging.
fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

//! fixonce-relay: error capture and delivery for the FixOnce memory service
//!
//! This crate captures runtime errors inside a host process, relays them to
//! a privileged coordinator, and delivers them in batches to a local memory
//! service over HTTP.
//!
//! # Privacy Model
//!
//! Capture is **opt-in per origin**: nothing leaves a page unless its origin
//! is auto-allowed or whitelisted. Every record is sanitized before it
//! crosses a process boundary, and again when the relay accepts it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────── host process ─────────────┐
//! │ capture hooks ──▶ Capturer ──▶ PageRelay ──┐
//! └────────────────────────────────────────┘   │ unix socket / channel
//!                                              ▼
//!                  Coordinator ──▶ AdmissionPolicy
//!                       │
//!                       ▼
//!                  BatchQueue ──▶ MemoryServiceClient ──▶ memory service
//! ```
//!
//! - **Sanitize**: Secret redaction for messages, stacks and URLs
//! - **Capture**: Console, panic, task and HTTP hooks with rate limiting
//! - **Relay**: Envelope protocol, in-process channel and Unix socket bridge
//! - **Admission**: Auto-allow rules plus persistent and session whitelists
//! - **Queue**: Batching with debounce, re-queue on failure and reachability probing
//! - **Config**: Hierarchical TOML configuration
//! - **Telemetry**: Structured syslog logging for audit trails

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod admission;
pub mod capture;
pub mod cli;
pub mod cli_handler;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod queue;
pub mod record;
pub mod relay;
pub mod sanitize;
pub mod status;
pub mod telemetry;

//! Memory service client.
//!
//! # Endpoints
//!
//! | Method | Path                     | Body                         |
//! |--------|--------------------------|------------------------------|
//! | GET    | `/api/ping`              | none                         |
//! | POST   | `/api/log_error`         | one record                   |
//! | POST   | `/api/log_errors_batch`  | `{"errors": [...]}`          |
//! | POST   | `/api/handshake`         | `{"version", "timestamp"}`   |
//! | GET    | `/api/config`            | none                         |

mod client;
mod error;
mod wire;

pub use client::MemoryServiceClient;
pub use error::DeliveryError;
pub use wire::{BatchAck, HandshakeAck, PingResponse, ORIGIN_HEADER, ORIGIN_VALUE, SERVICE_NAME};

//! # Counter Relayer
//!
//! Multi-identity transaction relay. Accepts `increment()` requests, queues
//! them, and submits each as a signed transaction using whichever signing
//! identity is free, so callers never wait on confirmation latency.
//!
//! ## Quick Start
//! ```bash
//! RELAYER_IDENTITY_KEYS=0xac09...,0x59c6... cargo run --bin counter-relayer
//! ```
//!
//! ## Endpoints
//! - `POST /increment` - Queue one increment, returns its sequence number
//! - `GET /requests/{sequence}` - Outcome of a queued increment
//! - `GET /health` - Pool, queue, dispatcher, and RPC status
//! - `GET /ready` - Readiness probe
//! - `GET /metrics` - Prometheus metrics

pub mod config;
pub mod dispatcher;
mod error;
mod handlers;
pub mod identity;
pub mod identity_pool;
pub mod key_store;
pub mod ledger;
pub mod metrics;
pub mod middleware;
pub mod outcome;
pub mod queue;
pub mod relay;
mod response;
mod router;
pub mod rpc;
mod state;
pub mod submitter;
pub mod transaction;

pub use config::Config;
pub use dispatcher::{DispatchSettings, DispatcherState, DispatcherStats, RelayDispatcher};
pub use error::{Error, SubmissionError};
pub use identity::SigningIdentity;
pub use identity_pool::{IdentityLease, IdentityPool};
pub use ledger::{LedgerClient, TransactionReceipt};
pub use outcome::{OutcomeStatus, RequestStatus, SubmissionOutcome};
pub use relay::{RelayService, SubmitResponse};
pub use router::create as create_router;
pub use state::AppState;
pub use submitter::{SubmitterSettings, TransactionSubmitter};

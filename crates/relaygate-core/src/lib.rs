//! Relay engine and HTTP surface for relaygate.

pub mod auth;
pub mod billing;
pub mod classify;
pub mod core;
pub mod error;
pub mod handler;
pub mod meta;
pub mod relay;
pub mod stream;
pub mod upstream_client;

pub use auth::{AuthProvider, TokenAuth, TokenContext, TokenEntry, TokenSnapshot};
pub use billing::{QuotaError, QuotaLedger, RatioTable, Reservation};
pub use classify::{classify_path, parse_relay_request};
pub use crate::core::{Core, CoreState};
pub use error::RelayError;
pub use relay::{
    RelayConfig, RelayEngine, RelayEngineParts, RelayRequest, RelayResponse, SettlementConfig,
};
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};

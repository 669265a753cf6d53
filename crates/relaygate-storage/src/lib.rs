pub mod bus;
pub mod db;
pub mod entities;
pub mod sinks;
pub mod snapshot;
pub mod storage;

pub use bus::{ControlEvent, StorageBus, StorageBusConfig};
pub use sinks::{CostRecord, CostStore, NoopQuotaSink, QuotaDelta, QuotaSink};
pub use snapshot::{AccountRow, ChannelRow, StorageSnapshot, TokenRow};
pub use storage::{AccountInput, ChannelInput, RelayStorage, StorageError, StorageResult, TokenInput};

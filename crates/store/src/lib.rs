//! Persistence for the keeper: the position store, the trade ledger, and
//! the advisory lock files that keep concurrent processes honest.

pub mod ledger;
pub mod locks;
pub mod positions;

pub use ledger::TradeLedger;
pub use locks::{EntryLock, EntryLockDir, InstanceLock, LockError, DEFAULT_STALE_AFTER};
pub use positions::PositionStore;

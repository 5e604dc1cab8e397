//! The trading engines: entry admission, the exit decision loop, and
//! on-chain reconciliation, wired to the store and the broker through the
//! trait seams in `keeper-core`.

pub mod entry;
pub mod exit;
pub mod notify;
pub mod reconcile;

pub use entry::{EntryEngine, EntryReceipt, EntryRejection, EntryRequest};
pub use exit::{evaluate, ExitManager, ExitSignal};
pub use notify::{NullNotifier, ScriptNotifier};
pub use reconcile::Reconciler;

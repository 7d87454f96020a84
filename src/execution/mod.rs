pub mod dispatcher;
pub mod key_lock;
pub mod ledger;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, DispatcherConfig};
pub use key_lock::{KeyGuard, KeyedLocks, PositionKey};
pub use ledger::{apply_fill, FeeSchedule, FillReport, LedgerError, LedgerOutcome, RealizedPnl, Transition};

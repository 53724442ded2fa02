//! Processing history ledger.
//!
//! An append-only, time-bounded audit log of processing outcomes, template
//! usage and user corrections per deal and document. The ledger is
//! best-effort: it never fails the operation being recorded, and it is
//! independent of the queue's live state.

mod ledger;
mod record;

pub use ledger::{DEFAULT_WRITE_BUFFER, HistoryLedger, LedgerError};
pub use record::{HistoryAction, ProcessingHistoryRecord};

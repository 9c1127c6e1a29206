//! Almanac backend.
//!
//! Ties a record store to the structures derived from it:
//!
//! - [`SummaryIndex`]: denormalized contact fields cached in memory and in
//!   `<store-file>.summary`, used to answer simple queries without touching
//!   the store.
//! - [`LiveQuerySession`]: a subscriber kept in sync with the set of records
//!   matching a query, populated in resumable slices.
//! - [`Backend`]: the operation surface external glue calls into. It owns the
//!   store, the summary and the sessions, and serializes mutations so every
//!   session sees them in the same order.

mod backend;
mod flush;
pub mod live;
pub mod summary;

pub use backend::{Backend, BackendError, SessionId};
pub use flush::FlushTimer;
pub use live::{LiveConfig, LiveQuerySession, Progress, QueryStatus, SessionState, Subscriber};
pub use summary::{SUMMARY_FIELDS, SummaryEntry, SummaryIndex};

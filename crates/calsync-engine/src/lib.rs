//! Synchronization engine for CalSync.
//!
//! Decides, per source event and sync flow, whether a "Busy" placeholder
//! must be created, removed, or left alone in the target calendar, and
//! drives the two delivery paths that feed it: push notifications and the
//! periodic poll. The engine holds no persisted state; every decision is
//! recomputed from what the remote calendars currently contain.

pub mod account;
pub mod busy;
pub mod poll;
pub mod sync;
pub mod webhook;

pub use account::{AccountError, AccountManager};
pub use busy::{BusyBlock, BUSY_TITLE};
pub use poll::{PollingScheduler, RunStats};
pub use sync::{
    Action, CalendarSyncReport, EngineError, EngineStats, ProcessingResult, SyncEngine,
    SyncSummary, SyncType,
};
pub use webhook::{Notification, Subscription, WebhookHandler, WebhookValidationError};

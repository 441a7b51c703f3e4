//! Remote calendar API client for CalSync.
//!
//! Wraps the provider's REST API with bounded retry and refresh-token
//! authentication. All reconciliation decisions live in `calsync-engine`;
//! this crate only moves events over the wire.

pub mod client;
pub mod error;
pub mod retry;
pub mod types;

pub use client::{CalendarClient, Credentials};
pub use error::CalendarError;
pub use retry::RetryConfig;
pub use types::{
    Attendee, Calendar, Channel, Event, EventStatus, EventTime, Transparency,
};

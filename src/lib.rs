//! Shared rides for students.
//!
//! A shared ride request either joins a compatible waiting ride (same
//! destination, pickup within the match window) or opens a new one. Every
//! party must accept before the ride confirms at half fare; declines and
//! cancellations split parties off and hand ownership on.

pub mod cancel;
pub mod config;
pub mod consent;
pub mod error;
pub mod history;
pub mod http;
pub mod identity;
pub mod matching;
pub mod notify;
pub mod profile;
pub mod ride;
pub mod service;
pub mod store;
pub mod utils;

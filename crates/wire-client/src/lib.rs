//! Client-side multiplexing engine.
//!
//! A [`Client`] owns one framed connection and lets any number of callers
//! submit calls concurrently, correlated by sequence number and delivered
//! out of order as replies arrive. [`dial`] is the usual entry point.

mod call;
mod client;
mod dial;
mod pending;

pub use call::{CallRecord, CallResult, PendingCall};
pub use client::Client;
pub use dial::dial;

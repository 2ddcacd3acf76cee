//! Newsletter dispatch service.
//!
//! Bulk mail for subscription members is tracked as jobs in an external row
//! store: scheduling a job freezes the recipient list into pending queue
//! rows, and repeatedly-invoked dispatch cycles claim rows under a lease,
//! push each message through the mail provider, and write outcomes back
//! until the queue drains.

pub mod app_state;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

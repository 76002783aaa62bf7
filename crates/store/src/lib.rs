//! DAO layer over the relational store.
//!
//! Every operation is a single statement-level query; the claim write and
//! the recipient/channel reads are intentionally not atomic with each other
//! (see the scheduler for the accepted race window).

pub mod reminders;
pub mod subscriptions;
pub mod users;

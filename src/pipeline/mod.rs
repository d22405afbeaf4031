//! Comment-created trigger handling.
//!
//! [`classify`] and [`builder`] are pure; [`coordinator`] owns the
//! read-append-mark sequence for one invocation; [`dispatch`] reports
//! outcomes and fans invocations out across workers.

pub mod builder;
pub mod classify;
pub mod coordinator;
pub mod dispatch;

//! Ambient stack shared by the managed-log crates: error types, the async
//! runtime re-export, and the small concurrency primitives built on top of
//! it.
//!
//! Every crate in the workspace imports `mlog_common::errors::*` for
//! `Result`/`Error`/`format_err!` rather than depending on an error crate
//! directly, and reaches for `mlog_common::async_std` rather than pulling in
//! an executor of its own.

#[macro_use]
extern crate async_trait;
#[macro_use]
pub extern crate failure;
pub extern crate async_std;
pub extern crate bytes;
pub extern crate chrono;
pub extern crate futures;

pub mod cancellation;
pub mod errors;

pub use async_trait::*;
pub use cancellation::{with_cancellation, CancellationToken};
pub use failure::Fail;

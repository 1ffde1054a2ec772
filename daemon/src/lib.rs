//! The authentication core of the authgate login daemon.
//!
//! Two subsystems live here: the broker session machinery
//! ([`broker`], [`catalog`], [`session`]) that drives a login attempt
//! against an external authentication broker over IPC, and the temporary
//! identity registry ([`tempentries`]) that tracks provisional users
//! until an attempt concludes.

#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

pub mod broker;
pub mod catalog;
pub mod session;
pub mod tempentries;

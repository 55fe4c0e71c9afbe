//! grefsen - compositor supervisor
//!
//! grefsen wraps a compositor runtime with the pieces that keep a session
//! alive and debuggable:
//!
//! - [`log_sink`]: crash-safe, fixed-format log file with lazy open
//! - [`crash_guard`]: fatal signal trap that respawns the compositor
//! - [`display`]: display selection and one-window-per-display placement
//! - [`supervisor`]: start-up sequencing from logging to the runtime loop
//!
//! The compositor scene itself sits behind the traits in [`backend`].

#![warn(rust_2018_idioms)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod crash_guard;
pub mod display;
pub mod error;
pub mod log_sink;
pub mod supervisor;

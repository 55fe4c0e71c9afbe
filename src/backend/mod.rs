//! Backends the supervisor can hand control to
//!
//! The compositor runtime itself lives outside this crate. It is reached
//! through two traits: [`DisplaySource`] enumerates the physical displays
//! and [`Scene`] exposes the top-level windows and the runtime loop.

pub mod headless;

use crate::display::{Assignment, DisplayDescriptor};
use crate::error::GrefsenResult;
use std::fmt;

/// Display subsystem
pub trait DisplaySource {
    /// Displays in a stable enumeration order
    fn displays(&self) -> Vec<DisplayDescriptor>;
}

/// Compositor scene and runtime loop
pub trait Scene {
    /// Handle to a top-level window
    type Window: Clone + fmt::Debug + fmt::Display;

    /// Top-level windows in scene order
    fn windows(&self) -> Vec<Self::Window>;

    /// Whether the scene may put windows into fullscreen state
    fn set_fullscreen_allowed(&mut self, allowed: bool);

    /// Move a window onto its display as described by the assignment
    fn place(&mut self, assignment: &Assignment<Self::Window>);

    /// Run until shutdown and return the process exit code
    fn run(self) -> GrefsenResult<i32>;
}

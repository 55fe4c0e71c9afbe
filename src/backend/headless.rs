//! Headless backend
//!
//! Stands in for a real output stack: displays come from the config file
//! or `--output`, the scene holds a fixed number of top-level windows, and
//! the runtime loop just waits for SIGINT, SIGTERM or SIGHUP. A fault can
//! be injected once the loop starts, which is how the crash guard and the
//! fatal log path are exercised end to end.

use crate::backend::{DisplaySource, Scene};
use crate::config::OutputConfig;
use crate::display::{Assignment, DisplayDescriptor, GeometryDisplay, Placement};
use crate::error::{GrefsenError, GrefsenResult};
use clap::ValueEnum;
use nix::sys::signal::{SigSet, Signal};
use smithay::utils::{Logical, Rectangle};
use std::fmt;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};

/// Size of a window that was never resized
pub const NATURAL_WINDOW_SIZE: (i32, i32) = (1280, 720);

/// Name of the output used when none is configured
pub const DEFAULT_OUTPUT_NAME: &str = "HEADLESS-1";

/// Fault raised from the runtime loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Fault {
    /// SIGSEGV
    Segv,
    /// abort(), i.e. SIGABRT
    Abort,
    /// SIGFPE
    Fpe,
    /// Unbounded recursion until the stack guard page is hit
    StackOverflow,
    /// A fatal log record
    FatalLog,
}

impl Fault {
    pub fn trigger(self) -> ! {
        match self {
            Fault::Segv => raise(Signal::SIGSEGV),
            Fault::Fpe => raise(Signal::SIGFPE),
            Fault::Abort => std::process::abort(),
            Fault::StackOverflow => {
                let depth = overflow_stack(0);
                crate::fatal!("stack did not overflow after {depth} frames")
            }
            Fault::FatalLog => crate::fatal!("injected fatal error"),
        }
    }
}

fn raise(signal: Signal) -> ! {
    // Without the crash guard, std's stack overflow handler swallows the
    // first SIGSEGV and falls back to the default disposition
    for _ in 0..2 {
        let _ = nix::sys::signal::raise(signal);
    }
    crate::fatal!("{signal} did not terminate the process")
}

#[allow(unconditional_recursion)]
fn overflow_stack(depth: u64) -> u64 {
    let frame = std::hint::black_box([depth; 256]);
    overflow_stack(depth + 1).wrapping_add(frame[(depth % 256) as usize])
}

/// Settings of the headless backend
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessConfig {
    pub outputs: Vec<OutputConfig>,
    /// Number of top-level windows in the scene
    pub windows: u32,
    pub fault: Option<Fault>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        let (width, height) = crate::config::DEFAULT_OUTPUT_SIZE;
        Self {
            outputs: vec![OutputConfig::new(
                DEFAULT_OUTPUT_NAME,
                Rectangle::new((0, 0).into(), (width, height).into()),
            )],
            windows: 1,
            fault: None,
        }
    }
}

/// Handle to a headless window, numbered from 1 in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(NonZeroU32);

impl WindowId {
    pub fn from_raw(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(WindowId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Window({})", self.0)
    }
}

/// A top-level window of the headless scene
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessWindow {
    pub id: WindowId,
    pub geometry: Rectangle<i32, Logical>,
    pub fullscreen: bool,
    /// Name of the display the window was placed on
    pub display: Option<String>,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    outputs: Vec<OutputConfig>,
    windows: Vec<HeadlessWindow>,
    fullscreen_allowed: bool,
    fault: Option<Fault>,
}

impl HeadlessBackend {
    pub fn new(config: HeadlessConfig) -> Self {
        let (width, height) = NATURAL_WINDOW_SIZE;
        let windows = (1..=config.windows)
            .filter_map(WindowId::from_raw)
            .map(|id| HeadlessWindow {
                id,
                geometry: Rectangle::new((0, 0).into(), (width, height).into()),
                fullscreen: false,
                display: None,
            })
            .collect();
        Self {
            outputs: config.outputs,
            windows,
            fullscreen_allowed: true,
            fault: config.fault,
        }
    }

    pub fn window(&self, id: WindowId) -> Option<&HeadlessWindow> {
        self.windows.iter().find(|window| window.id == id)
    }

    pub fn fullscreen_allowed(&self) -> bool {
        self.fullscreen_allowed
    }
}

impl DisplaySource for HeadlessBackend {
    fn displays(&self) -> Vec<DisplayDescriptor> {
        self.outputs.iter().map(OutputConfig::descriptor).collect()
    }
}

impl Scene for HeadlessBackend {
    type Window = WindowId;

    fn windows(&self) -> Vec<WindowId> {
        self.windows.iter().map(|window| window.id).collect()
    }

    fn set_fullscreen_allowed(&mut self, allowed: bool) {
        self.fullscreen_allowed = allowed;
    }

    fn place(&mut self, assignment: &Assignment<WindowId>) {
        let Some(window) = self
            .windows
            .iter_mut()
            .find(|window| window.id == assignment.window)
        else {
            warn!("Cannot place unknown {}", assignment.window);
            return;
        };

        match assignment.placement {
            Placement::Windowed { origin } => {
                window.geometry.loc = origin;
                window.fullscreen = false;
            }
            Placement::Fullscreen { geometry } => {
                window.geometry = geometry;
                window.fullscreen = true;
            }
        }
        window.display = Some(assignment.display.name.clone());

        info!(
            "Placed {} on {} at {} ({})",
            window.id,
            assignment.display.name,
            GeometryDisplay(&window.geometry),
            if window.fullscreen {
                "fullscreen"
            } else {
                "windowed"
            }
        );
    }

    fn run(self) -> GrefsenResult<i32> {
        let mut shutdown = SigSet::empty();
        shutdown.add(Signal::SIGINT);
        shutdown.add(Signal::SIGTERM);
        shutdown.add(Signal::SIGHUP);
        shutdown
            .thread_block()
            .map_err(|err| GrefsenError::Backend(format!("cannot block shutdown signals: {err}")))?;

        info!(
            "Headless compositor running: {} windows, {} outputs",
            self.windows.len(),
            self.outputs.len()
        );
        for window in self.windows.iter().filter(|window| window.display.is_none()) {
            debug!("{} has no display", window.id);
        }

        if let Some(fault) = self.fault {
            warn!("Injecting fault: {fault:?}");
            fault.trigger();
        }

        let signal = shutdown
            .wait()
            .map_err(|err| GrefsenError::Backend(format!("waiting for shutdown failed: {err}")))?;
        info!("Received {signal}, shutting down");
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::assign;

    fn backend(outputs: &[(&str, i32)], windows: u32) -> HeadlessBackend {
        HeadlessBackend::new(HeadlessConfig {
            outputs: outputs
                .iter()
                .map(|(name, x)| {
                    OutputConfig::new(*name, Rectangle::new((*x, 0).into(), (1920, 1080).into()))
                })
                .collect(),
            windows,
            fault: None,
        })
    }

    #[test]
    fn default_config_has_one_output_and_window() {
        let backend = HeadlessBackend::new(HeadlessConfig::default());
        let displays = backend.displays();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].name, DEFAULT_OUTPUT_NAME);
        assert_eq!(backend.windows().len(), 1);
    }

    #[test]
    fn fullscreen_placement_takes_display_bounds() {
        let mut backend = backend(&[("HDMI-1", 0), ("eDP-1", 1920)], 3);
        let windows = backend.windows();
        let displays = backend.displays();

        for assignment in assign(&windows, &displays, false) {
            backend.place(&assignment);
        }

        let second = backend.window(windows[1]).unwrap();
        assert!(second.fullscreen);
        assert_eq!(second.display.as_deref(), Some("eDP-1"));
        assert_eq!(second.geometry, displays[1].geometry);

        let third = backend.window(windows[2]).unwrap();
        assert!(!third.fullscreen);
        assert_eq!(third.display, None);
    }

    #[test]
    fn windowed_placement_keeps_natural_size() {
        let mut backend = backend(&[("HDMI-1", 0), ("eDP-1", 1920)], 2);
        backend.set_fullscreen_allowed(false);
        let windows = backend.windows();
        let displays = backend.displays();

        for assignment in assign(&windows, &displays, true) {
            backend.place(&assignment);
        }

        let second = backend.window(windows[1]).unwrap();
        assert!(!second.fullscreen);
        assert!(!backend.fullscreen_allowed());
        assert_eq!(
            second.geometry,
            Rectangle::new((1920, 0).into(), NATURAL_WINDOW_SIZE.into())
        );
    }

    #[test]
    fn window_ids_count_from_one() {
        let backend = backend(&[("HDMI-1", 0)], 2);
        let ids: Vec<u32> = backend.windows().into_iter().map(WindowId::get).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(backend.windows()[1].to_string(), "Window(2)");
        assert_eq!(WindowId::from_raw(0), None);
    }

    #[test]
    fn fault_names() {
        assert_eq!(Fault::from_str("segv", false), Ok(Fault::Segv));
        assert_eq!(Fault::from_str("stack-overflow", false), Ok(Fault::StackOverflow));
        assert_eq!(Fault::from_str("fatal-log", false), Ok(Fault::FatalLog));
    }
}

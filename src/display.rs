//! Window to display assignment
//!
//! Displays are enumerated once at startup, optionally narrowed down to the
//! screens named on the command line or in the config file, and then paired
//! positionally with the scene's top-level windows: the first window goes to
//! the first display, the second to the second, and so on. Whatever is left
//! over on either side stays unassigned.

use crate::error::{GrefsenError, GrefsenResult};
use smithay::utils::{Logical, Point, Raw, Rectangle, Size};
use std::fmt;
use tracing::{debug, warn};

/// Logical DPI reported for every display
pub const LOGICAL_DPI: f64 = 96.0;

const MM_PER_INCH: f64 = 25.4;

/// Dots per inch of a display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dpi {
    pub logical: f64,
    pub physical: f64,
}

/// A physical display as reported by the display subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayDescriptor {
    /// Connector name, e.g. `HDMI-1`
    pub name: String,
    /// Position and size in the global compositor space
    pub geometry: Rectangle<i32, Logical>,
    /// Physical size in millimeters; zero when unknown
    pub physical_size_mm: Size<i32, Raw>,
    pub dpi: Dpi,
}

impl DisplayDescriptor {
    /// Describe a display, deriving its physical DPI from the millimeter size
    pub fn new(
        name: impl Into<String>,
        geometry: Rectangle<i32, Logical>,
        physical_size_mm: Size<i32, Raw>,
    ) -> Self {
        let physical = if physical_size_mm.w > 0 {
            geometry.size.w as f64 / (physical_size_mm.w as f64 / MM_PER_INCH)
        } else {
            LOGICAL_DPI
        };
        Self {
            name: name.into(),
            geometry,
            physical_size_mm,
            dpi: Dpi {
                logical: LOGICAL_DPI,
                physical,
            },
        }
    }
}

impl fmt::Display for DisplayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, GeometryDisplay(&self.geometry))
    }
}

/// Formats a rectangle as `WIDTHxHEIGHT+X+Y`
pub struct GeometryDisplay<'a>(pub &'a Rectangle<i32, Logical>);

impl fmt::Display for GeometryDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rect = self.0;
        write!(
            f,
            "{}x{}+{}+{}",
            rect.size.w, rect.size.h, rect.loc.x, rect.loc.y
        )
    }
}

/// How a window is put on its display
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// Natural size, top-left corner at the display origin
    Windowed { origin: Point<i32, Logical> },
    /// Geometry forced to the display bounds, fullscreen state set
    Fullscreen { geometry: Rectangle<i32, Logical> },
}

impl Placement {
    pub fn for_display(display: &DisplayDescriptor, windowed: bool) -> Self {
        if windowed {
            Placement::Windowed {
                origin: display.geometry.loc,
            }
        } else {
            Placement::Fullscreen {
                geometry: display.geometry,
            }
        }
    }

    pub fn is_fullscreen(&self) -> bool {
        matches!(self, Placement::Fullscreen { .. })
    }
}

/// A window paired with the display it goes to
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment<W> {
    pub window: W,
    pub display: DisplayDescriptor,
    pub placement: Placement,
}

/// Pair windows with displays in order
///
/// The result has `min(windows.len(), displays.len())` entries.
#[profiling::function]
pub fn assign<W: Clone>(
    windows: &[W],
    displays: &[DisplayDescriptor],
    windowed: bool,
) -> Vec<Assignment<W>> {
    windows
        .iter()
        .zip(displays)
        .map(|(window, display)| Assignment {
            window: window.clone(),
            display: display.clone(),
            placement: Placement::for_display(display, windowed),
        })
        .collect()
}

/// Keep only the displays named in `requested`
///
/// Names are compared ASCII case-insensitively and enumeration order is
/// kept. An empty request keeps every display; a request that matches
/// nothing is an error rather than a silent fallback.
#[profiling::function]
pub fn select_displays(
    displays: Vec<DisplayDescriptor>,
    requested: &[String],
) -> GrefsenResult<Vec<DisplayDescriptor>> {
    if requested.is_empty() {
        return Ok(displays);
    }

    let (keepers, others): (Vec<_>, Vec<_>) = displays.into_iter().partition(|display| {
        requested
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&display.name))
    });

    if keepers.is_empty() {
        warn!("None of the screens {requested:?} exist; available screens:");
        for other in &others {
            warn!("    {other}");
        }
        return Err(GrefsenError::NoMatchingDisplays {
            requested: requested.to_vec(),
            available: others.into_iter().map(|display| display.name).collect(),
        });
    }

    Ok(keepers)
}

/// Log what is known about each display
pub fn describe_displays(displays: &[DisplayDescriptor]) {
    for output in displays {
        debug!(
            "Screen {} {} physical {}x{}mm DPI: log {:.1} phys {:.1}",
            output.name,
            GeometryDisplay(&output.geometry),
            output.physical_size_mm.w,
            output.physical_size_mm.h,
            output.dpi.logical,
            output.dpi.physical
        );
    }
}

//! Startup sequencing
//!
//! The order matters. The process identity is captured by `main` before
//! anything else runs. Logging comes next so every later step is recorded
//! in the right place, then the crash guard, and only then do the displays
//! get picked and windows placed before control goes to the runtime loop.

use crate::backend::headless::HeadlessBackend;
use crate::backend::{DisplaySource, Scene};
use crate::cli::Settings;
use crate::config::{Options, CONFIG_FILE_NAME};
use crate::crash_guard::{self, CrashGuard, CrashGuardError, ProcessIdentity};
use crate::display::{assign, describe_displays, select_displays};
use crate::error::{log_error, GrefsenResult};
use crate::log_sink::{self, LogSink};
use tracing::{debug, info, warn};

/// Supervisor with logging set up and, if requested, the crash guard armed
#[derive(Debug)]
pub struct Supervisor {
    options: Options,
    guard: Option<CrashGuard>,
}

impl Supervisor {
    /// Set up logging and arm the crash guard
    ///
    /// A crash guard that cannot be armed is logged and skipped, the
    /// compositor then simply runs unprotected.
    pub fn start(
        identity: Result<ProcessIdentity, CrashGuardError>,
        options: Options,
        warnings: &[String],
    ) -> GrefsenResult<Self> {
        match &options.log_file {
            Some(path) => log_sink::init_with_file(path)?,
            None => log_sink::init_tracing(LogSink::global()),
        }

        match &identity {
            Ok(identity) => info!(
                "grefsen starting (pid {}, executable {})",
                identity.pid(),
                identity.executable_path().display()
            ),
            Err(err) => info!("grefsen starting (pid {}, {err})", std::process::id()),
        }
        for warning in warnings {
            warn!("{}: {warning}", options.config_dir.join(CONFIG_FILE_NAME).display());
        }

        let guard = if options.respawn {
            log_error(identity.and_then(crash_guard::install))
        } else {
            debug!("Respawn disabled, crash guard not installed");
            None
        };

        Ok(Self { options, guard })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Whether a trapped signal will respawn the process
    pub fn respawn_armed(&self) -> bool {
        self.guard.is_some()
    }

    /// Pick displays, place the windows and run the scene
    ///
    /// Fails before any window is touched when none of the requested
    /// screens exist.
    pub fn launch<B>(self, backend: B) -> GrefsenResult<i32>
    where
        B: DisplaySource + Scene,
    {
        let displays = select_displays(backend.displays(), &self.options.screens)?;
        describe_displays(&displays);

        let mut scene = backend;
        scene.set_fullscreen_allowed(!self.options.windowed);

        let windows = scene.windows();
        let assignments = assign(&windows, &displays, self.options.windowed);
        if windows.len() > assignments.len() {
            debug!(
                "{} windows left where they are, only {} displays",
                windows.len() - assignments.len(),
                displays.len()
            );
        }
        for assignment in &assignments {
            scene.place(assignment);
        }

        scene.run()
    }
}

/// Run grefsen on the headless backend
pub fn run(
    identity: Result<ProcessIdentity, CrashGuardError>,
    settings: Settings,
) -> GrefsenResult<i32> {
    let supervisor = Supervisor::start(identity, settings.options, &settings.warnings)?;
    supervisor.launch(HeadlessBackend::new(settings.headless))
}

//! grefsen - compositor supervisor
//!
//! Run with `--help` to see the available options.

use clap::Parser;
use grefsen::cli::Cli;
use grefsen::crash_guard::ProcessIdentity;
use grefsen::log_sink::LogSink;

fn main() {
    // Captured before anything else so a respawn execs the binary that was started
    let identity = ProcessIdentity::capture();
    // Starts the clock log records are stamped against
    LogSink::global();

    #[cfg(feature = "profile-with-tracy")]
    profiling::tracy_client::Client::start();

    profiling::register_thread!("Main Thread");

    #[cfg(feature = "profile-with-puffin")]
    let _server = match puffin_http::Server::new(&format!("0.0.0.0:{}", puffin_http::DEFAULT_PORT))
    {
        Ok(server) => Some(server),
        Err(err) => {
            eprintln!("grefsen: failed to start puffin profiling server: {err}");
            None
        }
    };
    #[cfg(feature = "profile-with-puffin")]
    profiling::puffin::set_scopes_on(true);

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            // --help and --version are not errors
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("grefsen: {err}");
            std::process::exit(err.exit_code());
        }
    };

    match grefsen::supervisor::run(identity, settings) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tracing::error!("Fatal error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

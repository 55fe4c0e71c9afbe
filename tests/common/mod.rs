//! Common testing utilities for grefsen integration tests

#![allow(dead_code)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How long to wait for the compositor to log something
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Test environment with its own config home, log file and stderr capture
pub struct TestEnv {
    pub test_name: String,
    dir: tempfile::TempDir,
    pub compositor_process: Option<Child>,
    /// Processes started behind our back, e.g. by a respawn
    pub stray_pids: Vec<Pid>,
}

impl TestEnv {
    /// Create a new test environment in a fresh temporary directory
    pub fn new(test_name: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix(&format!("grefsen-{test_name}-"))
            .tempdir()
            .expect("Failed to create temporary directory");
        fs::create_dir_all(dir.path().join("config").join("grefsen"))
            .expect("Failed to create config directory");
        Self {
            test_name: test_name.to_string(),
            dir,
            compositor_process: None,
            stray_pids: Vec::new(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("grefsen.log")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.path().join("stderr.txt")
    }

    /// `$XDG_CONFIG_HOME/grefsen`
    pub fn config_dir(&self) -> PathBuf {
        self.dir.path().join("config").join("grefsen")
    }

    /// Write `grefsen.conf` where a respawned process will find it
    pub fn write_config(&self, content: &str) {
        fs::write(self.config_dir().join("grefsen.conf"), content)
            .expect("Failed to write config file");
    }

    /// Start the compositor with given arguments
    pub fn start_compositor(&mut self, args: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        let stderr = File::create(self.stderr_path())?;

        println!("Starting compositor for test '{}'...", self.test_name);
        let child = Command::new(env!("CARGO_BIN_EXE_grefsen"))
            .args(args)
            .env("XDG_CONFIG_HOME", self.dir.path().join("config"))
            .env("HOME", self.dir.path())
            .env_remove("RUST_LOG")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()?;

        self.compositor_process = Some(child);
        Ok(())
    }

    /// Wait for the compositor to exit on its own
    pub fn wait_for_exit(&mut self) -> Result<ExitStatus, Box<dyn std::error::Error>> {
        let child = self
            .compositor_process
            .as_mut()
            .ok_or("Compositor was not started")?;
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                self.compositor_process = None;
                return Ok(status);
            }
            if start.elapsed() > WAIT_TIMEOUT {
                return Err(format!("Compositor did not exit within {WAIT_TIMEOUT:?}").into());
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    /// Send SIGTERM and wait for the exit status
    pub fn terminate(&mut self) -> Result<ExitStatus, Box<dyn std::error::Error>> {
        let child = self
            .compositor_process
            .as_ref()
            .ok_or("Compositor was not started")?;
        kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM)?;
        self.wait_for_exit()
    }

    pub fn log(&self) -> String {
        read_or_empty(&self.log_path())
    }

    pub fn stderr(&self) -> String {
        read_or_empty(&self.stderr_path())
    }

    /// Wait until the log file has a line satisfying `predicate`
    pub fn wait_for_log<F>(&self, description: &str, predicate: F) -> Result<String, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> bool,
    {
        wait_for_line(&self.log_path(), description, predicate)
    }

    /// Wait until `needle` shows up in at least `count` log lines
    pub fn wait_for_log_count(&self, needle: &str, count: usize) -> Result<(), Box<dyn std::error::Error>> {
        let start = Instant::now();
        while self.log().lines().filter(|line| line.contains(needle)).count() < count {
            if start.elapsed() > WAIT_TIMEOUT {
                return Err(format!("Timed out waiting for {count}x {needle:?}:\n{}", self.log()).into());
            }
            thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    /// Wait until stderr has a line satisfying `predicate`
    pub fn wait_for_stderr<F>(&self, description: &str, predicate: F) -> Result<String, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> bool,
    {
        wait_for_line(&self.stderr_path(), description, predicate)
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        // Kill compositor process if running
        if let Some(mut child) = self.compositor_process.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        for pid in self.stray_pids.drain(..) {
            let _ = kill(pid, Signal::SIGKILL);
        }
    }
}

fn read_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

fn wait_for_line<F>(path: &Path, description: &str, predicate: F) -> Result<String, Box<dyn std::error::Error>>
where
    F: Fn(&str) -> bool,
{
    let start = Instant::now();
    loop {
        if let Some(line) = read_or_empty(path).lines().find(|line| predicate(line)) {
            return Ok(line.to_string());
        }
        if start.elapsed() > WAIT_TIMEOUT {
            return Err(format!(
                "Timed out waiting for {description} in {}:\n{}",
                path.display(),
                read_or_empty(path)
            )
            .into());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// The binary under test as the kernel reports it, symlinks resolved
pub fn grefsen_exe() -> String {
    let path = Path::new(env!("CARGO_BIN_EXE_grefsen"));
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Pull `(pid, executable)` out of a `grefsen starting (pid N, executable PATH)` line
pub fn parse_startup_line(line: &str) -> Option<(i32, String)> {
    let rest = line.split("grefsen starting (pid ").nth(1)?;
    let (pid, rest) = rest.split_once(", executable ")?;
    let executable = rest.strip_suffix(')')?;
    Some((pid.parse().ok()?, executable.to_string()))
}

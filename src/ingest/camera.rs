//! Camera process management.
//!
//! The video source is an external program (`libcamera-vid` by default)
//! that writes an endless MJPEG stream to stdout. `CameraProcess` owns the
//! child; the demuxer only gets its stdout and a liveness probe.

use anyhow::{anyhow, Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::{Arc, Mutex};

use super::mjpeg::UpstreamProbe;

/// Parameters for the camera program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub program: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            program: "libcamera-vid".to_string(),
            width: 640,
            height: 480,
            framerate: 15,
        }
    }
}

impl CameraConfig {
    /// Arguments for an unbounded MJPEG stream on stdout with no preview.
    pub fn args(&self) -> Vec<String> {
        vec![
            "--timeout".to_string(),
            "0".to_string(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--framerate".to_string(),
            self.framerate.to_string(),
            "--codec".to_string(),
            "mjpeg".to_string(),
            "--output".to_string(),
            "-".to_string(),
            "--nopreview".to_string(),
            "--inline".to_string(),
            "--segment".to_string(),
            "1".to_string(),
        ]
    }
}

/// An external process producing the compressed video stream.
///
/// The supervisor holds this for the whole run; it is the only party that
/// terminates the process.
pub trait VideoProcess: Send {
    fn describe(&self) -> String;

    /// Hand over the byte stream. Returns `None` after the first call.
    fn take_stream(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Liveness check usable from the demuxer thread.
    fn probe(&self) -> UpstreamProbe;

    /// Returns true once the process has exited (and been reaped).
    fn has_exited(&mut self) -> Result<bool>;

    /// Ask the process to exit.
    fn terminate(&mut self) -> Result<()>;

    /// Force the process to exit.
    fn kill(&mut self) -> Result<()>;
}

/// Spawns video processes. Failure here aborts startup.
pub trait VideoLauncher {
    fn launch(&self) -> Result<Box<dyn VideoProcess>>;
}

// ----------------------------------------------------------------------------
// CameraProcess
// ----------------------------------------------------------------------------

pub struct CameraProcess {
    program: String,
    pid: u32,
    child: Arc<Mutex<Child>>,
    stdout: Option<Box<dyn Read + Send>>,
}

impl CameraProcess {
    pub fn spawn(config: &CameraConfig) -> Result<Self> {
        log::info!("starting camera: {} {}", config.program, config.args().join(" "));
        let mut child = ProcessCommand::new(&config.program)
            .args(config.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start camera program '{}'", config.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("camera stdout was not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(config.program.clone(), stderr);
        }

        Ok(Self {
            program: config.program.clone(),
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
            stdout: Some(Box::new(stdout)),
        })
    }

    fn with_child<T>(&self, f: impl FnOnce(&mut Child) -> Result<T>) -> Result<T> {
        let mut child = self
            .child
            .lock()
            .map_err(|_| anyhow!("camera process lock poisoned"))?;
        f(&mut child)
    }
}

impl VideoProcess for CameraProcess {
    fn describe(&self) -> String {
        format!("{} (pid {})", self.program, self.pid)
    }

    fn take_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout.take()
    }

    fn probe(&self) -> UpstreamProbe {
        let child = self.child.clone();
        Box::new(move || match child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        })
    }

    fn has_exited(&mut self) -> Result<bool> {
        self.with_child(|child| {
            Ok(child
                .try_wait()
                .context("poll camera process")?
                .is_some())
        })
    }

    fn terminate(&mut self) -> Result<()> {
        if self.has_exited()? {
            return Ok(());
        }
        send_terminate(self)
    }

    fn kill(&mut self) -> Result<()> {
        self.with_child(|child| {
            if child.try_wait().context("poll camera process")?.is_some() {
                return Ok(());
            }
            child.kill().context("kill camera process")?;
            child.wait().context("reap camera process")?;
            Ok(())
        })
    }
}

#[cfg(unix)]
fn send_terminate(process: &mut CameraProcess) -> Result<()> {
    let pid = libc::pid_t::try_from(process.pid)
        .map_err(|_| anyhow!("camera pid {} out of range", process.pid))?;
    // SAFETY: kill(2) has no memory-safety preconditions; the child has not
    // been reaped yet (checked above), so the pid still names it.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context("send SIGTERM to camera process");
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_terminate(process: &mut CameraProcess) -> Result<()> {
    process.with_child(|child| child.kill().context("terminate camera process"))
}

fn forward_stderr(program: String, stderr: impl Read + Send + 'static) {
    let spawned = std::thread::Builder::new()
        .name("camera-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => log::debug!("{}: {}", program, line),
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        });
    if let Err(err) = spawned {
        log::warn!("camera stderr will not be logged: {}", err);
    }
}

/// Launches `CameraProcess` instances from a config.
pub struct CameraLauncher {
    pub config: CameraConfig,
}

impl CameraLauncher {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

impl VideoLauncher for CameraLauncher {
    fn launch(&self) -> Result<Box<dyn VideoProcess>> {
        Ok(Box::new(CameraProcess::spawn(&self.config)?))
    }
}

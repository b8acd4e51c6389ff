#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use line_follower::ingest::{UpstreamProbe, VideoLauncher, VideoProcess};
use line_follower::transport::{CommandLink, LinkOpener};

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

// ----------------------------------------------------------------------------
// Fake controller link
// ----------------------------------------------------------------------------

/// Everything the fake link saw, shared with the test.
#[derive(Clone, Default)]
pub struct LinkLog {
    pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    pub attempts: Arc<AtomicUsize>,
    pub opened: Arc<AtomicUsize>,
}

impl LinkLog {
    pub fn lines(&self) -> Vec<String> {
        self.written
            .lock()
            .unwrap()
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

pub struct FakeLink {
    log: LinkLog,
    /// Errors returned by successive writes; `None` means success.
    write_script: VecDeque<Option<io::ErrorKind>>,
    echoes: VecDeque<Vec<u8>>,
}

impl CommandLink for FakeLink {
    fn describe(&self) -> String {
        "fake-link".to_string()
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.log.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(kind)) = self.write_script.pop_front() {
            return Err(io::Error::new(kind, "scripted failure"));
        }
        self.log.written.lock().unwrap().push(line.to_vec());
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(echo) = self.echoes.pop_front() else {
            return Ok(0);
        };
        let n = echo.len().min(buf.len());
        buf[..n].copy_from_slice(&echo[..n]);
        Ok(n)
    }
}

pub struct FakeOpener {
    pub log: LinkLog,
    pub fail_open: bool,
    pub open_delay: Duration,
    pub write_script: Vec<Option<io::ErrorKind>>,
    pub echoes: Vec<Vec<u8>>,
}

impl FakeOpener {
    pub fn new(log: &LinkLog) -> Self {
        Self {
            log: log.clone(),
            fail_open: false,
            open_delay: Duration::ZERO,
            write_script: Vec::new(),
            echoes: Vec::new(),
        }
    }
}

impl LinkOpener for FakeOpener {
    fn describe(&self) -> String {
        "fake-port".to_string()
    }

    fn open(&self) -> Result<Box<dyn CommandLink>> {
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if self.fail_open {
            return Err(anyhow!("could not open fake-port: device busy"));
        }
        Ok(Box::new(FakeLink {
            log: self.log.clone(),
            write_script: self.write_script.iter().copied().collect(),
            echoes: self.echoes.iter().cloned().collect(),
        }))
    }
}

// ----------------------------------------------------------------------------
// Fake camera process
// ----------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct ProcessLog {
    pub terminate_calls: Arc<AtomicUsize>,
    pub kill_calls: Arc<AtomicUsize>,
}

/// Serves a fixed byte stream, then idles until terminated.
pub struct FakeCamera {
    stream: Option<Box<dyn Read + Send>>,
    alive: Arc<AtomicBool>,
    ignore_terminate: bool,
    log: ProcessLog,
}

impl VideoProcess for FakeCamera {
    fn describe(&self) -> String {
        "fake-camera".to_string()
    }

    fn take_stream(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stream.take()
    }

    fn probe(&self) -> UpstreamProbe {
        let alive = self.alive.clone();
        Box::new(move || alive.load(Ordering::SeqCst))
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(!self.alive.load(Ordering::SeqCst))
    }

    fn terminate(&mut self) -> Result<()> {
        self.log.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_terminate {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.log.kill_calls.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeLauncher {
    pub bytes: Vec<u8>,
    pub ignore_terminate: bool,
    pub fail: bool,
    pub no_stream: bool,
    pub log: ProcessLog,
}

impl FakeLauncher {
    pub fn new(bytes: Vec<u8>, log: &ProcessLog) -> Self {
        Self {
            bytes,
            ignore_terminate: false,
            fail: false,
            no_stream: false,
            log: log.clone(),
        }
    }
}

impl VideoLauncher for FakeLauncher {
    fn launch(&self) -> Result<Box<dyn VideoProcess>> {
        if self.fail {
            return Err(anyhow!("camera program not found"));
        }
        Ok(Box::new(FakeCamera {
            stream: if self.no_stream {
                None
            } else {
                Some(Box::new(Cursor::new(self.bytes.clone())) as Box<dyn Read + Send>)
            },
            alive: Arc::new(AtomicBool::new(true)),
            ignore_terminate: self.ignore_terminate,
            log: self.log.clone(),
        }))
    }
}

//! Steering policy: line position to command.
//!
//! Two boundaries, expressed as fractions of the frame width, split the
//! image into three bands. The policy is total: every position maps to
//! exactly one command.
//!
//! | centroid               | command   |
//! |------------------------|-----------|
//! | absent                 | `STOP`    |
//! | `x >= right`           | `RIGHT`   |
//! | `left < x < right`     | `FORWARD` |
//! | `x <= left`            | `LEFT`    |

use anyhow::{anyhow, Result};

use crate::command::Command;
use crate::slot::{LatestSlot, PutOutcome};

/// Latest-wins handoff from the decision loop to the transport worker.
pub type CommandSlot = LatestSlot<Command>;

/// Default left boundary: 62.5/160 of the width (250 px at 640).
pub const DEFAULT_LEFT_FRACTION: f64 = 62.5 / 160.0;
/// Default right boundary: 97.5/160 of the width (390 px at 640).
pub const DEFAULT_RIGHT_FRACTION: f64 = 97.5 / 160.0;

/// Boundary positions as fractions of the frame width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SteeringBands {
    pub left_fraction: f64,
    pub right_fraction: f64,
}

impl Default for SteeringBands {
    fn default() -> Self {
        Self {
            left_fraction: DEFAULT_LEFT_FRACTION,
            right_fraction: DEFAULT_RIGHT_FRACTION,
        }
    }
}

impl SteeringBands {
    pub fn new(left_fraction: f64, right_fraction: f64) -> Result<Self> {
        let bands = Self {
            left_fraction,
            right_fraction,
        };
        bands.validate()?;
        Ok(bands)
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.left_fraction) || !in_unit(self.right_fraction) {
            return Err(anyhow!(
                "steering fractions must lie in [0, 1] (left={}, right={})",
                self.left_fraction,
                self.right_fraction
            ));
        }
        if self.left_fraction >= self.right_fraction {
            return Err(anyhow!(
                "left steering boundary ({}) must be below the right one ({})",
                self.left_fraction,
                self.right_fraction
            ));
        }
        Ok(())
    }

    /// Pixel boundaries for a frame of the given width.
    pub fn bounds(&self, width: u32) -> Bounds {
        let width = f64::from(width);
        Bounds {
            left: width * self.left_fraction,
            right: width * self.right_fraction,
        }
    }
}

/// Pixel boundaries for one frame width.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub right: f64,
}

impl Bounds {
    /// Map a centroid x to a command. Equality resolves outward.
    pub fn classify(&self, x: Option<f64>) -> Command {
        let Some(x) = x else {
            return Command::Stop;
        };
        if x >= self.right {
            Command::Right
        } else if x > self.left {
            Command::Forward
        } else {
            Command::Left
        }
    }
}

/// Turns observations into commands and publishes them.
pub struct DecisionEngine {
    bands: SteeringBands,
    commands: std::sync::Arc<CommandSlot>,
    displaced: u64,
}

impl DecisionEngine {
    pub fn new(bands: SteeringBands, commands: std::sync::Arc<CommandSlot>) -> Self {
        Self {
            bands,
            commands,
            displaced: 0,
        }
    }

    pub fn bands(&self) -> SteeringBands {
        self.bands
    }

    /// Decide for a frame of `width` and offer the result without blocking.
    pub fn decide(&mut self, centroid_x: Option<f64>, width: u32) -> Command {
        let command = self.bands.bounds(width).classify(centroid_x);
        log::debug!("decision: {} (x={:?})", command, centroid_x);
        if self.commands.put(command) == PutOutcome::Evicted {
            self.displaced += 1;
            log::debug!(
                "command slot full, displaced oldest ({} so far)",
                self.displaced
            );
        }
        command
    }

    /// Commands pushed out of the slot before the transport read them.
    pub fn displaced(&self) -> u64 {
        self.displaced
    }
}

// Error taxonomy for the simulation engine.
//
// Every fatal condition a run can hit maps to one variant here; the binary
// logs the message and exits non-zero. There is no retry path below the
// phase level: the unit of recovery is re-running a phase from its last
// good checkpoint.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Invalid or inconsistent configuration, detected while building the
    /// frozen `Parameters` store. The message names the offending field.
    #[error("configuration error: {0}")]
    Config(String),

    /// A phase was invoked without its upstream checkpoint and auto-init is
    /// disabled. `required` names the subcommand the user must run first.
    #[error("missing prerequisite: no {missing} checkpoint found; run `{required}` first")]
    MissingPrerequisite { missing: String, required: String },

    /// The geometry-relevant options embedded in a checkpoint differ from
    /// the currently loaded configuration.
    #[error(
        "config options are out of sync between the seed and this {phase} attempt; \
         run `seed` again to match the current settings"
    )]
    SeedOutOfSync { phase: String },

    /// Time step violates a stability bound. Reports a safe value rather
    /// than silently correcting.
    #[error(
        "time step {dt} s is too large for stable {solver}; \
         set the time step to at most {suggested} s and try again"
    )]
    TimestepTooLarge {
        solver: &'static str,
        dt: f64,
        suggested: f64,
    },

    /// NaN or Inf detected in a state array; the run aborts immediately.
    #[error("numerical blowup: non-finite values in `{field}` at t = {time} s")]
    NumericalBlowup { field: &'static str, time: f64 },

    /// Cluster geometry could not be generated, or a cutting event would
    /// disconnect the gap-junction graph.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// A checkpoint file exists but is not a readable checkpoint (bad magic,
    /// unknown format version, or a corrupt payload).
    #[error("checkpoint `{}` is unreadable: {reason}", path.display())]
    BadCheckpoint { path: PathBuf, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Config(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        SimError::Geometry(msg.into())
    }
}

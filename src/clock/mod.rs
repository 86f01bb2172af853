//! Deterministic time for prevalent systems.
//!
//! Commands must not read the wall clock: replay would see a different
//! time. A system keeps a [`Clock`] instead, and the wall clock reaches it
//! only through logged [`Tick`] commands, usually sent by a [`TimeActor`].

pub mod actor;

pub use actor::TimeActor;

use crate::core::{Command, CommandError, System};
use anyhow::ensure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Virtual time owned by the system. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    time: DateTime<Utc>,
}

impl Clock {
    /// A clock at the Unix epoch.
    pub fn new() -> Self {
        Self {
            time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn forward_to(&mut self, time: DateTime<Utc>) -> std::result::Result<(), CommandError> {
        ensure!(
            time >= self.time,
            "clock cannot go back from {} to {}",
            self.time,
            time
        );
        self.time = time;
        Ok(())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A system that carries a [`Clock`].
///
/// Register [`Tick`] in [`System::register_commands`] (or with
/// `PrevalenceBuilder::command::<Tick>()`) so ticks can be executed.
pub trait ClockedSystem: System {
    fn clock(&self) -> &Clock;

    fn clock_mut(&mut self) -> &mut Clock;

    fn time(&self) -> DateTime<Utc> {
        self.clock().time()
    }
}

/// Moves the system clock forward.
///
/// Ticks are coalescible: a run of ticks with no other command in between
/// reaches the log as its last tick only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick(pub DateTime<Utc>);

impl Tick {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl<S: ClockedSystem> Command<S> for Tick {
    type Output = ();
    const KIND: &'static str = "clock.tick";

    fn execute(&self, system: &mut S, _context: &S::Context) -> std::result::Result<(), CommandError> {
        system.clock_mut().forward_to(self.0)
    }

    fn is_coalescible(&self) -> bool {
        true
    }
}

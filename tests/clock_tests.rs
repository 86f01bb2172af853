//! Integration tests for the virtual clock and tick coalescing

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rustprevalent::storage::{LogReader, MessagePack};
use rustprevalent::{
    Clock, ClockedSystem, Command, CommandError, CommandRegistry, Marshaller, OsFileService,
    Prevalence, PrevalenceConfig, System, Tick, TimeActor,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Library {
    clock: Clock,
    loans: Vec<(String, DateTime<Utc>)>,
}

impl System for Library {
    type Context = ();

    fn register_commands<M: Marshaller>(commands: &mut CommandRegistry<Self, M>) -> rustprevalent::Result<()> {
        commands.register::<Tick>()?;
        commands.register::<Lend>()
    }
}

impl ClockedSystem for Library {
    fn clock(&self) -> &Clock {
        &self.clock
    }

    fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }
}

/// Records a loan at the system's own time, never the wall clock.
#[derive(Serialize, Deserialize)]
struct Lend(String);

impl Command<Library> for Lend {
    type Output = DateTime<Utc>;
    const KIND: &'static str = "library.lend";

    fn execute(&self, system: &mut Library, _: &()) -> Result<DateTime<Utc>, CommandError> {
        let now = system.time();
        system.loans.push((self.0.clone(), now));
        Ok(now)
    }
}

fn open(dir: &Path) -> Prevalence<Library> {
    Prevalence::open(PrevalenceConfig::new(dir), Library::default).unwrap()
}

fn logged_kinds(dir: &Path) -> Vec<String> {
    let path = dir.join("000000000000000000001.command_log");
    LogReader::open(&OsFileService, &path, &MessagePack)
        .unwrap()
        .map(|record| record.unwrap().kind)
        .collect()
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).unwrap()
}

#[test]
fn test_only_last_tick_before_a_command_is_logged() {
    let temp_dir = TempDir::new().unwrap();
    {
        let kernel = open(temp_dir.path());
        kernel.execute_command(Tick(at(8))).unwrap();
        kernel.execute_command(Tick(at(9))).unwrap();
        kernel.execute_command(Tick(at(10))).unwrap();
        assert_eq!(kernel.execute_command(Lend("Dune".into())).unwrap(), at(10));
        kernel.execute_command(Lend("Emma".into())).unwrap();
        kernel.execute_command(Tick(at(11))).unwrap();
        assert_eq!(kernel.read(|library, _| library.time()).unwrap(), at(11));
    }

    assert_eq!(
        logged_kinds(temp_dir.path()),
        vec!["clock.tick", "library.lend", "library.lend"]
    );

    // The trailing tick was never logged; the clock comes back at 10:00.
    let kernel = open(temp_dir.path());
    let (time, loans) = kernel
        .read(|library, _| (library.time(), library.loans.clone()))
        .unwrap();
    assert_eq!(time, at(10));
    assert_eq!(loans, vec![("Dune".to_string(), at(10)), ("Emma".to_string(), at(10))]);
}

#[test]
fn test_snapshot_keeps_pending_tick_effect() {
    let temp_dir = TempDir::new().unwrap();
    {
        let kernel = open(temp_dir.path());
        kernel.execute_command(Tick(at(12))).unwrap();
        kernel.take_snapshot().unwrap();
    }

    let kernel = open(temp_dir.path());
    assert_eq!(kernel.read(|library, _| library.time()).unwrap(), at(12));
}

#[test]
fn test_backwards_tick_fails_without_moving_clock() {
    let temp_dir = TempDir::new().unwrap();
    let kernel = open(temp_dir.path());
    kernel.execute_command(Tick(at(15))).unwrap();

    let err = kernel
        .execute_command(Tick(at(15) - ChronoDuration::minutes(1)))
        .unwrap_err();
    assert!(err.to_string().contains("clock.tick"));
    assert_eq!(kernel.read(|library, _| library.time()).unwrap(), at(15));
}

#[test]
fn test_time_actor_drives_clock() {
    let temp_dir = TempDir::new().unwrap();
    let kernel = Arc::new(open(temp_dir.path()));
    let started = Utc::now();

    let mut actor = TimeActor::launch(Arc::clone(&kernel), Duration::from_millis(10)).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    actor.destroy();
    assert!(!actor.is_running());

    let time = kernel.read(|library, _| library.time()).unwrap();
    assert!(time >= started);
    assert!(time <= Utc::now());
}

//! Concurrent access tests
//!
//! Many threads share one kernel through an `Arc`: commands are serialized,
//! queries run side by side and never observe a half-applied command.

use rustprevalent::{
    Command, CommandError, CommandRegistry, Marshaller, Prevalence, PrevalenceConfig, Query,
    System,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Accounts {
    /// Always sums to zero after every command.
    balances: Vec<i64>,
}

impl System for Accounts {
    type Context = ();

    fn register_commands<M: Marshaller>(commands: &mut CommandRegistry<Self, M>) -> rustprevalent::Result<()> {
        commands.register::<Transfer>()
    }
}

#[derive(Serialize, Deserialize)]
struct Transfer {
    from: usize,
    to: usize,
    amount: i64,
}

impl Command<Accounts> for Transfer {
    type Output = ();
    const KIND: &'static str = "accounts.transfer";

    fn execute(&self, system: &mut Accounts, _: &()) -> Result<(), CommandError> {
        system.balances[self.from] -= self.amount;
        system.balances[self.to] += self.amount;
        Ok(())
    }
}

struct Sum;

impl Query<Accounts> for Sum {
    type Output = i64;

    fn query(&self, system: &Accounts, _: &()) -> Result<i64, CommandError> {
        Ok(system.balances.iter().sum())
    }
}

const ACCOUNTS: usize = 4;
const WRITERS: usize = 4;
const READERS: usize = 4;
const TRANSFERS_PER_WRITER: usize = 25;

fn open(dir: &std::path::Path) -> Prevalence<Accounts> {
    Prevalence::open(PrevalenceConfig::new(dir), || Accounts {
        balances: vec![0; ACCOUNTS],
    })
    .unwrap()
}

#[test]
fn test_concurrent_commands_and_queries() {
    let temp_dir = TempDir::new().unwrap();
    let kernel = Arc::new(open(temp_dir.path()));
    let barrier = Arc::new(Barrier::new(WRITERS + READERS));

    let mut handles = vec![];

    for writer in 0..WRITERS {
        let kernel = Arc::clone(&kernel);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..TRANSFERS_PER_WRITER {
                kernel
                    .execute_command(Transfer {
                        from: writer % ACCOUNTS,
                        to: (writer + i + 1) % ACCOUNTS,
                        amount: 1,
                    })
                    .unwrap();
            }
        }));
    }

    for reader in 0..READERS {
        let kernel = Arc::clone(&kernel);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for _ in 0..TRANSFERS_PER_WRITER {
                let sum = kernel.execute_query(Sum).unwrap();
                assert_eq!(sum, 0, "reader {} saw a half-applied transfer", reader);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    let balances = kernel.read(|accounts, _| accounts.balances.clone()).unwrap();
    kernel.close().unwrap();

    let reopened = open(temp_dir.path());
    assert_eq!(
        reopened.recovery_report().records_replayed,
        WRITERS * TRANSFERS_PER_WRITER
    );
    assert_eq!(
        reopened.read(|accounts, _| accounts.balances.clone()).unwrap(),
        balances
    );
}

#[test]
fn test_snapshots_interleaved_with_commands() {
    let temp_dir = TempDir::new().unwrap();
    let kernel = Arc::new(open(temp_dir.path()));

    let writer = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || {
            for _ in 0..40 {
                kernel
                    .execute_command(Transfer {
                        from: 0,
                        to: 1,
                        amount: 2,
                    })
                    .unwrap();
            }
        })
    };
    let snapshotter = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || {
            for _ in 0..5 {
                kernel.take_snapshot().unwrap();
            }
        })
    };

    writer.join().unwrap();
    snapshotter.join().unwrap();
    drop(kernel);

    let reopened = open(temp_dir.path());
    assert_eq!(
        reopened.read(|accounts, _| accounts.balances.clone()).unwrap(),
        vec![-80, 80, 0, 0]
    );
}

#[test]
fn test_kernel_is_send_and_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Prevalence<Accounts>>();
}

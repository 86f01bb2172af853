use super::{ClockedSystem, Tick};
use crate::core::{PrevalenceError, Result};
use crate::facade::Prevalence;
use crate::storage::Marshaller;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Background thread that keeps a kernel's clock close to the wall clock.
///
/// Sends one tick at launch and then one every `delay` until destroyed or
/// the kernel is closed or halted.
pub struct TimeActor {
    stop_tx: Option<Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl TimeActor {
    pub fn launch<S, M>(kernel: Arc<Prevalence<S, M>>, delay: Duration) -> Result<Self>
    where
        S: ClockedSystem,
        M: Marshaller,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let join_handle = thread::Builder::new()
            .name("time-actor".to_string())
            .spawn(move || {
                loop {
                    match kernel.execute_command(Tick::now()) {
                        Ok(()) => {}
                        Err(PrevalenceError::Closed) => {
                            debug!("kernel closed, time actor stopping");
                            break;
                        }
                        Err(PrevalenceError::Halted(reason)) => {
                            warn!(%reason, "kernel halted, time actor stopping");
                            break;
                        }
                        Err(err) => warn!(error = %err, "clock tick failed"),
                    }
                    match stop_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        })
    }

    /// Stops the thread and waits for it. Calling it again does nothing.
    pub fn destroy(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                warn!("time actor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for TimeActor {
    fn drop(&mut self) {
        self.destroy();
    }
}

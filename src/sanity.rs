//! Process-wide self test run before the first kernel is opened.
//!
//! Opening a kernel trusts two things it cannot verify per record: that the
//! marshaller reproduces arbitrary bytes exactly, and that the platform hands
//! back what was written to a file. Both are checked once per marshaller.

use crate::core::{PrevalenceError, Result};
use crate::storage::Marshaller;
use lazy_static::lazy_static;
use serde_bytes::ByteBuf;
use std::collections::HashSet;
use std::io::{Seek, Write};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Bytes that trip up text-mode I/O and naive encoders: a high byte, NULs
/// and line feeds.
pub const SANITY_BYTES: [u8; 8] = [0x85, 0x00, 0x0a, 0x00, 0x78, 0x30, 0x64, 0x0a];

lazy_static! {
    static ref GLOBAL_SANITY_CHECK: Arc<SanityCheck> = Arc::new(SanityCheck::new());
}

/// Remembers which marshallers passed the check.
///
/// Kernels use the process-wide instance unless one is handed to
/// `PrevalenceBuilder::sanity_check`.
#[derive(Default)]
pub struct SanityCheck {
    /// Names of marshallers that already passed.
    passed: Mutex<HashSet<&'static str>>,
}

impl SanityCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the process-wide instance
    pub fn global() -> &'static Arc<SanityCheck> {
        &GLOBAL_SANITY_CHECK
    }

    /// Runs the check for `marshaller` unless it already passed in this process.
    ///
    /// Concurrent callers wait for the first run. A failed run is not
    /// remembered, so the next open checks again.
    pub fn run_once<M: Marshaller>(&self, marshaller: &M) -> Result<()> {
        let mut passed = self.passed.lock()?;
        if passed.contains(marshaller.name()) {
            return Ok(());
        }
        run(marshaller)?;
        passed.insert(marshaller.name());
        debug!(marshaller = marshaller.name(), "sanity check passed");
        Ok(())
    }

    pub fn has_passed<M: Marshaller>(&self, marshaller: &M) -> bool {
        self.passed
            .lock()
            .map(|passed| passed.contains(marshaller.name()))
            .unwrap_or(false)
    }
}

/// Runs the check unconditionally.
pub fn run<M: Marshaller>(marshaller: &M) -> Result<()> {
    let expected = ByteBuf::from(SANITY_BYTES.to_vec());

    let encoded = marshaller.to_bytes(&expected).map_err(failed)?;
    let decoded: ByteBuf = marshaller.from_bytes(&encoded).map_err(failed)?;
    if decoded != expected {
        return Err(PrevalenceError::SanityCheckFailed(format!(
            "{} marshaller returned {:02x?} for {:02x?}",
            marshaller.name(),
            decoded.as_slice(),
            SANITY_BYTES
        )));
    }

    let mut file = tempfile::tempfile().map_err(failed)?;
    marshaller.dump(&expected, &mut file).map_err(failed)?;
    file.flush().map_err(failed)?;
    file.rewind().map_err(failed)?;
    let from_disk: ByteBuf = marshaller.load(&mut file).map_err(failed)?;
    if from_disk != expected {
        return Err(PrevalenceError::SanityCheckFailed(format!(
            "file round trip returned {:02x?}",
            from_disk.as_slice()
        )));
    }
    Ok(())
}

fn failed(err: impl std::fmt::Display) -> PrevalenceError {
    PrevalenceError::SanityCheckFailed(err.to_string())
}

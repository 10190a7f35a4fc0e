//! Cooperative shutdown on Ctrl-C
//!
//! The interrupt handler only flips an atomic flag. The capture and playback
//! loops poll [`Shutdown::requested`] between blocking reads and writes and
//! unwind normally, so open WAV files and audio streams are released by their
//! owners.

use log::warn;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Exit status for a second Ctrl-C that arrives while cleanup is running
const FORCED_EXIT_CODE: i32 = 130;

/// Handle shared by every loop that needs to stop on user interrupt
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    /// Install the Ctrl-C handler and return a handle that observes it
    ///
    /// A second Ctrl-C terminates the process at once if cleanup hangs.
    pub fn install() -> Result<Self, ctrlc::Error> {
        let shutdown = Self::default();
        let handle = shutdown.clone();
        ctrlc::set_handler(move || {
            if handle.request() {
                warn!("Interrupted again, exiting without cleanup");
                std::process::exit(FORCED_EXIT_CODE);
            }
        })?;
        Ok(shutdown)
    }

    /// A handle that is only triggered through [`Shutdown::request`]
    #[cfg(test)]
    pub fn manual() -> Self {
        Self::default()
    }

    /// Ask every loop to stop. Returns true if a stop was already requested
    pub fn request(&self) -> bool {
        self.requested.swap(true, Ordering::AcqRel)
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

//! Downloader lifecycle state machine (spec §4.5.2), including the
//! `HasExperiencedWriteFailure` sticky flag named explicitly in spec.md and
//! expanded here into the concrete transition table SPEC_FULL.md calls for.

use crate::error::{DownloaderError, DownloaderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderState {
    Unstarted,
    Initialising,
    Ready,
    Fetching,
    Prefetching,
    ShuttingDown,
    Shutdown,
}

/// Tracks the current lifecycle state plus the sticky write-failure flag.
/// Once set, the sticky flag is never cleared by this type: a new
/// downloader (and therefore a new `StateMachine`) is required to recover,
/// matching spec.md §4.5.2's "sticky if the cause was local write failure".
pub struct StateMachine {
    state: DownloaderState,
    has_experienced_write_failure: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            state: DownloaderState::Unstarted,
            has_experienced_write_failure: false,
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DownloaderState {
        self.state
    }

    pub fn has_experienced_write_failure(&self) -> bool {
        self.has_experienced_write_failure
    }

    /// Validate and apply a transition. Returns an error without mutating
    /// state if the transition is not allowed from the current state, or if
    /// the sticky write-failure flag forbids re-entering `Initialising`.
    pub fn transition_to(&mut self, target: DownloaderState) -> DownloaderResult<()> {
        if self.has_experienced_write_failure && target != DownloaderState::Shutdown {
            return Err(DownloaderError::WriteFailureSticky);
        }

        let allowed = matches!(
            (self.state, target),
            (DownloaderState::Unstarted, DownloaderState::Initialising)
                | (DownloaderState::Initialising, DownloaderState::Ready)
                | (DownloaderState::Initialising, DownloaderState::Unstarted)
                | (DownloaderState::Ready, DownloaderState::Fetching)
                | (DownloaderState::Ready, DownloaderState::Prefetching)
                | (DownloaderState::Ready, DownloaderState::ShuttingDown)
                | (DownloaderState::Fetching, DownloaderState::Ready)
                | (DownloaderState::Fetching, DownloaderState::ShuttingDown)
                | (DownloaderState::Prefetching, DownloaderState::Ready)
                | (DownloaderState::Prefetching, DownloaderState::ShuttingDown)
                | (DownloaderState::ShuttingDown, DownloaderState::Shutdown)
        );

        if !allowed {
            return Err(DownloaderError::NotReady);
        }

        self.state = target;
        Ok(())
    }

    /// Record a local write failure during init: returns to `Unstarted`
    /// and sets the sticky flag (spec §4.5.2).
    pub fn mark_write_failure(&mut self) {
        self.has_experienced_write_failure = true;
        self.state = DownloaderState::Unstarted;
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::status::Status;

/// Lifecycle state shared by every stream.
///
/// A stream is *healthy* while `Open` or `ClosedOk`. Failure is latched:
/// once `Failed`, the only remaining transition is to `ClosedFailed`.
#[derive(Debug)]
enum StreamState {
    Open,
    ClosedOk,
    Failed(Status),
    ClosedFailed(Status),
}

/// Status and lifecycle primitive embedded in every reader and writer.
///
/// Tracks the `Open → ClosedOk` / `Open → Failed → ClosedFailed` transitions
/// and holds the annotated failure status once one is latched.
#[derive(Debug)]
pub struct StreamBase {
    state: StreamState,
}

impl StreamBase {
    /// Creates the base in the open state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::Open,
        }
    }

    /// Creates the base already failed with `status`.
    ///
    /// Used by constructors that discover a problem before the stream can
    /// perform its first operation, so the failure surfaces through the
    /// regular latched contract.
    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self {
            state: StreamState::Failed(status),
        }
    }

    /// `true` while the stream has not failed.
    #[must_use]
    pub fn ok(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::ClosedOk)
    }

    /// `true` until the stream is closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::Failed(_))
    }

    /// The latched failure, if any.
    #[must_use]
    pub fn status(&self) -> Option<&Status> {
        match &self.state {
            StreamState::Open | StreamState::ClosedOk => None,
            StreamState::Failed(status) | StreamState::ClosedFailed(status) => Some(status),
        }
    }

    /// Latches `status` as the stream's failure. The first failure wins;
    /// later ones are discarded so the original cause is never replaced.
    ///
    /// Returns `false` for use as a tail call in operations that report
    /// failure by returning `false`.
    pub fn fail(&mut self, status: Status) -> bool {
        match self.state {
            StreamState::Open => self.state = StreamState::Failed(status),
            StreamState::ClosedOk => self.state = StreamState::ClosedFailed(status),
            StreamState::Failed(_) | StreamState::ClosedFailed(_) => {}
        }
        false
    }

    /// Attaches context to the latched failure, if there is one.
    pub fn annotate_failure(&mut self, context: impl Into<String>) {
        match &mut self.state {
            StreamState::Open | StreamState::ClosedOk => {}
            StreamState::Failed(status) | StreamState::ClosedFailed(status) => {
                let annotated = std::mem::replace(status, Status::internal("")).annotated(context);
                *status = annotated;
            }
        }
    }

    /// Marks the stream closed. Idempotent; a latched failure is preserved.
    pub fn mark_closed(&mut self) {
        self.state = match std::mem::replace(&mut self.state, StreamState::ClosedOk) {
            StreamState::Open | StreamState::ClosedOk => StreamState::ClosedOk,
            StreamState::Failed(status) | StreamState::ClosedFailed(status) => StreamState::ClosedFailed(status),
        };
    }
}

impl Default for StreamBase {
    fn default() -> Self {
        Self::new()
    }
}

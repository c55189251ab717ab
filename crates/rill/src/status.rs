// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Write as _;
use std::io;

/// Absolute byte position within a stream.
pub type Position = u64;

/// Classification of a stream failure.
///
/// The taxonomy is deliberately small; the message and annotation chain on
/// [`Status`] carry the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusKind {
    /// Malformed input or an invalid option combination.
    InvalidArgument,
    /// The underlying data changed or was truncated under the stream.
    DataLoss,
    /// The requested capability is absent on this stream instance.
    Unimplemented,
    /// A position counter would overflow, or a resource limit was reached.
    ResourceExhausted,
    /// The operation is invalid in the stream's current state.
    FailedPrecondition,
    /// An internal invariant of a collaborator failed (e.g. context setup).
    Internal,
    /// An operating-system error, translated from `errno` or equivalent.
    Io,
}

/// A failure value carried by a stream once it stops being healthy.
///
/// A `Status` is a `(kind, message)` pair plus an append-only chain of
/// context strings. Layers that relay a failure upward attach their own byte
/// position context via [`annotated()`][Status::annotated] without disturbing
/// the originating message, so the bottommost cause always survives.
///
/// The `Display` form renders the outermost context first:
///
/// ```
/// use rill::{Status, StatusKind};
///
/// let status = Status::new(StatusKind::InvalidArgument, "bad frame")
///     .annotated("at uncompressed byte 17")
///     .annotated("reading /tmp/log.zst at byte 4096");
/// assert_eq!(
///     status.to_string(),
///     "reading /tmp/log.zst at byte 4096: at uncompressed byte 17: bad frame",
/// );
/// assert_eq!(status.message(), "bad frame");
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{}", render(.message, .context))]
pub struct Status {
    kind: StatusKind,
    message: String,
    context: Vec<String>,
    #[source]
    os: Option<io::Error>,
}

fn render(message: &str, context: &[String]) -> String {
    let mut out = String::new();
    for layer in context.iter().rev() {
        let _ = write!(out, "{layer}: ");
    }
    out.push_str(message);
    out
}

impl Status {
    /// Creates a status of the given kind.
    #[must_use]
    pub fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
            os: None,
        }
    }

    /// Creates an [`InvalidArgument`][StatusKind::InvalidArgument] status.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusKind::InvalidArgument, message)
    }

    /// Creates a [`DataLoss`][StatusKind::DataLoss] status.
    #[must_use]
    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(StatusKind::DataLoss, message)
    }

    /// Creates an [`Unimplemented`][StatusKind::Unimplemented] status.
    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Unimplemented, message)
    }

    /// Creates a [`ResourceExhausted`][StatusKind::ResourceExhausted] status.
    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(StatusKind::ResourceExhausted, message)
    }

    /// Creates a [`FailedPrecondition`][StatusKind::FailedPrecondition] status.
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusKind::FailedPrecondition, message)
    }

    /// Creates an [`Internal`][StatusKind::Internal] status.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusKind::Internal, message)
    }

    /// Captures an operating-system error, preserving the original as the
    /// error source.
    #[must_use]
    pub fn os_error(error: io::Error) -> Self {
        Self {
            kind: StatusKind::Io,
            message: error.to_string(),
            context: Vec::new(),
            os: Some(error),
        }
    }

    /// The status raised when a position counter would overflow.
    #[must_use]
    pub fn position_overflow() -> Self {
        Self::resource_exhausted("stream position overflow")
    }

    /// Appends a layer of context, such as `"reading <file> at byte <pos>"`.
    ///
    /// Contexts accumulate; the most recently attached one renders first.
    #[must_use]
    pub fn annotated(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    /// The failure classification.
    #[must_use]
    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    /// The originating message, without any attached context.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The context chain, in attachment order (innermost first).
    #[must_use]
    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// The captured OS error, when [`kind()`][Self::kind] is
    /// [`Io`][StatusKind::Io].
    #[must_use]
    pub fn os(&self) -> Option<&io::Error> {
        self.os.as_ref()
    }
}

impl Clone for Status {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            context: self.context.clone(),
            // io::Error is not Clone; reconstruct from the raw OS code when
            // one exists so the clone still maps back to errno.
            os: self.os.as_ref().map(|e| {
                e.raw_os_error()
                    .map_or_else(|| io::Error::new(e.kind(), e.to_string()), io::Error::from_raw_os_error)
            }),
        }
    }
}

impl From<io::Error> for Status {
    fn from(error: io::Error) -> Self {
        Self::os_error(error)
    }
}

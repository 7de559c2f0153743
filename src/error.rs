//! Error kinds for fallible `worldtree` operations (spec §7).
//!
//! Assertions (`Unsupported`, `Internal`) still fire in debug builds at the
//! exact points spec §7 names them; these variants exist so a release build
//! with assertions compiled out still reports a typed failure instead of
//! silently misbehaving.

/// Failure modes exposed by `worldtree`'s public API.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A null/foreign/malformed argument was passed; no state was mutated.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A PLY mesh payload didn't match the accepted grammar. The partially
    /// built mesh has already been discarded.
    #[error("malformed mesh: {0}")]
    MalformedMesh(String),

    /// The binary world snapshot was truncated or otherwise unreadable.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller asked for behavior this crate's contract doesn't support
    /// (e.g. a downward-facing ray direction for ray pick).
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// An internal invariant was violated (unreachable BVH tag arm, etc).
    #[error("internal invariant violation: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

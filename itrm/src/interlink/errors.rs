// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::RecordError;
use miette::Diagnostic;
use std::path::PathBuf;

/// Errors on the interlink socket and the slave to master stream.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum InterlinkError {
    #[error("Failed to bind the interlink socket at {path:?}")]
    #[diagnostic(
        code(itrm::interlink::bind),
        help("Another master may own the socket, or the directory is not writable")
    )]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to the interlink socket at {path:?}")]
    #[diagnostic(
        code(itrm::interlink::connect),
        help("Check that the master process is still running")
    )]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept an interlink connection")]
    #[diagnostic(code(itrm::interlink::accept))]
    Accept(#[source] std::io::Error),

    #[error("The stream ended after {got} of {expected} handshake bytes")]
    #[diagnostic(
        code(itrm::interlink::truncated_info),
        help("The slave exited or was killed during attach")
    )]
    TruncatedInfo { got: usize, expected: usize },

    #[error("Unknown handshake magic {magic}")]
    #[diagnostic(
        code(itrm::interlink::bad_magic),
        help("Master and slave were built from incompatible versions")
    )]
    BadMagic { magic: i32 },

    #[error("Malformed handshake: {reason}")]
    #[diagnostic(code(itrm::interlink::bad_handshake))]
    BadHandshake { reason: &'static str },

    #[error("Malformed event record: {0:?}")]
    #[diagnostic(
        code(itrm::interlink::bad_record),
        help("Record boundaries are implicit, so the stream can't be resynchronized")
    )]
    BadRecord(RecordError),
}

impl From<RecordError> for InterlinkError {
    fn from(it: RecordError) -> Self { InterlinkError::BadRecord(it) }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors surfaced by the rosrt public API.

/// Errors returned by rosrt operations.
///
/// Constructor-time failures of the node singleton are fatal for the
/// process and come back through [`crate::init`] / handle construction.
/// Per-message failures (decode errors, overflow drops) never reach user
/// code; they are counted and logged.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Naming and registration
    // ========================================================================
    /// The name resolver rejected the input.
    NameInvalid(String),
    /// Advertisement or subscription type does not match an existing
    /// registration under the same resolved name.
    TypeConflict {
        name: String,
        existing: String,
        requested: String,
    },
    /// The callback queue installed for a registration is disabled, or a
    /// queue-related argument is out of range (queue sizes must be >= 1).
    QueueInvalid(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    /// Operation invoked before `rosrt::init` completed.
    NotInitialized,
    /// The node is shutting down; the operation was refused.
    Shutdown,
    /// Invalid state for the requested operation.
    InvalidState(String),

    // ========================================================================
    // Graph and transport
    // ========================================================================
    /// Directory service call failed after the configured retries.
    MasterUnreachable(String),
    /// Connection lost or handshake failed.
    TransportError(String),
    /// Service has no reachable provider.
    ServiceUnavailable(String),
    /// I/O error with underlying cause.
    Io(std::io::Error),

    // ========================================================================
    // Payloads
    // ========================================================================
    /// Outbound payload could not be encoded.
    SerializationError(String),
    /// Inbound payload could not be decoded for the declared type.
    DeserializationError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NameInvalid(name) => write!(f, "Invalid name: {}", name),
            Error::TypeConflict {
                name,
                existing,
                requested,
            } => write!(
                f,
                "Name '{}' already registered with type [{}], requested [{}]",
                name, existing, requested
            ),
            Error::QueueInvalid(msg) => write!(f, "Invalid queue: {}", msg),
            Error::NotInitialized => write!(f, "rosrt::init has not been called"),
            Error::Shutdown => write!(f, "Node is shutting down"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::MasterUnreachable(msg) => write!(f, "Master unreachable: {}", msg),
            Error::TransportError(msg) => write!(f, "Transport error: {}", msg),
            Error::ServiceUnavailable(name) => write!(f, "Service unavailable: {}", name),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::SerializationError(msg) => write!(f, "Serialization failed: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the public [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

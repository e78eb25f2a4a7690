// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the delivery path.

use thiserror::Error;
use uapub_core::CoreError;

/// Result alias for delivery operations.
pub type BufferResult<T> = Result<T, BufferError>;

// =============================================================================
// BufferError
// =============================================================================

/// Errors raised by the delivery queue and the batcher.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Delivery settings are inconsistent.
    #[error("Invalid delivery configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// A record could not be serialized.
    #[error(transparent)]
    Encoding(#[from] CoreError),

    /// A serialized record does not fit into one frame.
    #[error("Record of {size} bytes exceeds the frame budget of {budget} bytes")]
    Oversize {
        /// Serialized record size.
        size: usize,
        /// Usable frame payload.
        budget: usize,
    },

    /// The transport rejected a frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BufferError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

// =============================================================================
// TransportError
// =============================================================================

/// Errors raised by a telemetry transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker connection could not be set up.
    #[error("Transport connection to {target} failed: {message}")]
    Connection {
        /// Broker address.
        target: String,
        /// Error message.
        message: String,
    },

    /// A frame could not be handed to the transport.
    #[error("Failed to publish frame of {bytes} bytes: {message}")]
    Publish {
        /// Frame size.
        bytes: usize,
        /// Error message.
        message: String,
    },

    /// The transport has been shut down.
    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    /// Creates a connection error.
    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a publish error.
    pub fn publish(bytes: usize, message: impl Into<String>) -> Self {
        Self::Publish {
            bytes,
            message: message.into(),
        }
    }
}

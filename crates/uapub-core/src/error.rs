// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types shared across the publisher.

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the shared message and telemetry layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A telemetry rewrite pattern failed to compile.
    #[error("Invalid telemetry pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A record could not be encoded to JSON.
    #[error("Failed to encode message record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Outbound frames and the transport abstraction.

use async_trait::async_trait;

use crate::error::TransportError;

// =============================================================================
// Frame
// =============================================================================

/// One serialized batch of records, sent as a single transport message.
///
/// The payload is a JSON array of encoded records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
    records: usize,
}

impl Frame {
    /// Wraps a single encoded record into its own frame.
    pub fn single(encoded: &[u8]) -> Self {
        let mut builder = FrameBuilder::new(None);
        builder.push(encoded);
        builder.finish()
    }

    /// Serialized payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Number of records in the frame.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` if the frame holds no record.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

// =============================================================================
// FrameBuilder
// =============================================================================

/// Bytes added by the JSON array brackets.
pub const FRAME_ENVELOPE: usize = 2;

/// Accumulates encoded records into a size-bounded JSON array.
#[derive(Debug)]
pub(crate) struct FrameBuilder {
    body: Vec<u8>,
    records: usize,
    budget: Option<usize>,
}

impl FrameBuilder {
    /// `budget` bounds the bytes between the brackets; `None` is unbounded.
    pub(crate) fn new(budget: Option<usize>) -> Self {
        Self {
            body: Vec::new(),
            records: 0,
            budget,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Returns `true` if `size` more bytes fit into the current frame.
    pub(crate) fn fits(&self, size: usize) -> bool {
        match self.budget {
            None => true,
            Some(budget) => {
                let separator = usize::from(!self.is_empty());
                self.body.len() + separator + size <= budget
            }
        }
    }

    pub(crate) fn push(&mut self, encoded: &[u8]) {
        if !self.is_empty() {
            self.body.push(b',');
        }
        self.body.extend_from_slice(encoded);
        self.records += 1;
    }

    /// Closes the array and resets the builder.
    pub(crate) fn finish(&mut self) -> Frame {
        let body = std::mem::take(&mut self.body);
        let mut payload = Vec::with_capacity(body.len() + FRAME_ENVELOPE);
        payload.push(b'[');
        payload.extend_from_slice(&body);
        payload.push(b']');
        Frame {
            payload,
            records: std::mem::take(&mut self.records),
        }
    }
}

// =============================================================================
// TelemetryTransport
// =============================================================================

/// Message broker client used by the batcher.
///
/// Reliability is the transport's concern: the batcher never re-sends a
/// frame the transport rejected.
#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    /// Sends one frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Returns the name of this transport for logging.
    fn name(&self) -> &str;

    /// Bytes the transport protocol adds to each message.
    fn protocol_overhead(&self) -> usize {
        0
    }

    /// Returns true if the transport is currently connected.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Releases the connection. Called once after the final drain.
    async fn close(&self) {}
}

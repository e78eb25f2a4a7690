// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions

use uapub_buffer::DeliveryStats;
use uapub_opcua::{PointInfo, PointState};

/// Assertions over a point listing.
pub trait PointListAssertions {
    /// Asserts that `id` is listed in `state`.
    fn assert_point(&self, id: &str, state: PointState);

    /// Asserts that every listed point is in `state`.
    fn assert_all(&self, state: PointState);
}

impl PointListAssertions for [PointInfo] {
    fn assert_point(&self, id: &str, state: PointState) {
        let point = self
            .iter()
            .find(|p| p.id == id)
            .unwrap_or_else(|| panic!("point {id} not listed in {:?}", ids(self)));
        assert_eq!(point.state, state, "unexpected state for {id}");
    }

    fn assert_all(&self, state: PointState) {
        for point in self {
            assert_eq!(point.state, state, "unexpected state for {}", point.id);
        }
    }
}

impl PointListAssertions for Vec<PointInfo> {
    fn assert_point(&self, id: &str, state: PointState) {
        self.as_slice().assert_point(id, state);
    }

    fn assert_all(&self, state: PointState) {
        self.as_slice().assert_all(state);
    }
}

fn ids(points: &[PointInfo]) -> Vec<&str> {
    points.iter().map(|p| p.id.as_str()).collect()
}

/// Asserts that every record offered to the queue is accounted for.
pub fn assert_records_balanced(stats: &DeliveryStats) {
    let out = stats.records_sent
        + stats.records_failed
        + stats.oversize_drops
        + stats.encode_failures
        + stats.queued as u64;
    assert_eq!(stats.enqueued, out, "delivery counters do not balance: {stats:?}");
}

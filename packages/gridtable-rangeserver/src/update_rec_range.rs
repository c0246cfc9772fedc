//! Range-server update-path entities: a batch of requests ([`UpdateContext`])
//! is qualified into per-range slices ([`UpdateRecRange`]) over a shared
//! transfer buffer, grouped per destination range ([`UpdateRecRangeList`]).
//!
//! Invariants enforced here: slices appended to one list are contiguous
//! (the qualify stage only ever appends in offset order) and
//! `latest_transfer_revision` is monotone non-decreasing.

use gridtable_types::revision::Revision;

use crate::error::RangeError;

/// A single client mutation prior to qualification.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub row_key: Vec<u8>,
    pub column_family_id: u32,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

/// A batch of requests as received from the comm layer, possibly spanning
/// several ranges.
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    pub requests: Vec<UpdateRequest>,
}

impl UpdateContext {
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.requests
            .iter()
            .map(|r| r.row_key.len() + r.qualifier.len() + r.value.len())
            .sum()
    }
}

/// A single request's slice into the shared transfer buffer once resolved
/// to a range and assigned a revision.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRecRange {
    pub offset: usize,
    pub len: usize,
    pub revision: Revision,
}

/// All slices destined for one range, in the order qualify emitted them,
/// plus the handle of the transfer log they were redirected to if the
/// range was blocked.
#[derive(Debug, Clone, Default)]
pub struct UpdateRecRangeList {
    pub range_id: String,
    pub slices: Vec<UpdateRecRange>,
    pub latest_transfer_revision: Option<Revision>,
    pub redirected_to_transfer_log: bool,
}

impl UpdateRecRangeList {
    #[must_use]
    pub fn new(range_id: impl Into<String>) -> Self {
        Self { range_id: range_id.into(), ..Self::default() }
    }

    /// Appends a slice, enforcing contiguity with the previous slice and
    /// monotone non-decreasing revisions.
    pub fn push(&mut self, slice: UpdateRecRange) -> Result<(), RangeError> {
        if let Some(last) = self.slices.last() {
            if slice.offset != last.offset + last.len {
                return Err(RangeError::Grid(gridtable_types::error::GridError::InvalidOperation(
                    format!("non-contiguous slice for range {}", self.range_id),
                )));
            }
        }
        if let Some(prev) = self.latest_transfer_revision {
            if slice.revision < prev {
                return Err(RangeError::Grid(gridtable_types::error::GridError::TimestampOrderError {
                    attempted: slice.revision.as_i64(),
                    last: prev.as_i64(),
                }));
            }
        }
        self.latest_transfer_revision = Some(slice.revision);
        self.slices.push(slice);
        Ok(())
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.slices.iter().map(|s| s.len).sum()
    }
}

//! Tagged-region location.
//!
//! A region is delimited by an open and a close tag token. Prompts may
//! mention the open tag before the real reasoning starts (e.g. inside a
//! system instruction), so the region opens at a configurable occurrence of
//! the open tag and closes at the last close tag after it.

use crate::error::{Error, Result};

/// Located region: `start` and `end` are the positions of the tags
/// themselves, the content is strictly between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpan {
    /// Position of the open tag.
    pub start: usize,
    /// Position of the close tag.
    pub end: usize,
}

impl RegionSpan {
    /// Number of tokens strictly between the tags.
    pub fn inner_len(&self) -> usize {
        self.end - self.start - 1
    }

    /// Whether the tags are adjacent.
    pub fn is_empty(&self) -> bool {
        self.inner_len() == 0
    }
}

/// Finds the tagged region in a token sequence.
#[derive(Debug, Clone, Copy)]
pub struct SpanLocator {
    open_id: u32,
    close_id: u32,
    open_occurrence: usize,
}

impl SpanLocator {
    /// Creates a locator.
    ///
    /// # Arguments
    ///
    /// * `open_id` - Token id of the open tag
    /// * `close_id` - Token id of the close tag
    /// * `open_occurrence` - Zero-based occurrence of the open tag that starts the region
    pub fn new(open_id: u32, close_id: u32, open_occurrence: usize) -> Self {
        Self {
            open_id,
            close_id,
            open_occurrence,
        }
    }

    pub fn open_id(&self) -> u32 {
        self.open_id
    }

    pub fn close_id(&self) -> u32 {
        self.close_id
    }

    pub fn open_occurrence(&self) -> usize {
        self.open_occurrence
    }

    /// Locates the region in `ids`.
    ///
    /// Returns `Ok(None)` when either tag is absent or no close tag follows
    /// the selected open tag, and [`Error::OrdinalIndexOutOfRange`] when open
    /// tags exist but fewer than the configured occurrence requires.
    pub fn locate(&self, ids: &[u32]) -> Result<Option<RegionSpan>> {
        let positions = |target: u32| -> Vec<usize> {
            ids.iter()
                .enumerate()
                .filter_map(|(pos, &id)| (id == target).then_some(pos))
                .collect()
        };
        let opens = positions(self.open_id);
        let closes = positions(self.close_id);

        if opens.is_empty() || closes.is_empty() {
            return Ok(None);
        }

        let start = *opens
            .get(self.open_occurrence)
            .ok_or(Error::OrdinalIndexOutOfRange {
                ordinal: self.open_occurrence,
                found: opens.len(),
            })?;

        Ok(closes
            .iter()
            .rev()
            .find(|&&pos| pos > start)
            .map(|&end| RegionSpan { start, end }))
    }
}

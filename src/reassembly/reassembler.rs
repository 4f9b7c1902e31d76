//! Reorder buffer for one request's event channel.
//!
//! # Responsibilities
//! - Hold events that arrive ahead of their index
//! - Release events strictly in index order, starting at 0
//! - Stop at the first terminal event (`Done` or `Error`)
//!
//! # Design Decisions
//! - Pending events live in a `BTreeMap` keyed by index
//! - Release is lazy: [`Reassembler::accept`] returns an iterator that pops
//!   ready events as it is advanced
//! - An optional cap bounds the buffer; adversarial reordering from the
//!   remote side would otherwise grow it without limit

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::FetchError;
use crate::wire::types::{BodyEvent, WireResponseHeader};

/// An event released in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    Header(WireResponseHeader),
    Chunk(Bytes),
    Done,
    Failed(String),
}

/// Index-ordered release of out-of-order channel events.
#[derive(Debug)]
pub struct Reassembler {
    next_expected: u64,
    pending: BTreeMap<u64, BodyEvent>,
    max_pending: Option<usize>,
    finished: bool,
    high_water: usize,
}

impl Reassembler {
    /// `max_pending` caps how many events may wait for a missing index.
    pub fn new(max_pending: Option<usize>) -> Self {
        Self {
            next_expected: 0,
            pending: BTreeMap::new(),
            max_pending,
            finished: false,
            high_water: 0,
        }
    }

    /// Buffer one event and return the events now releasable.
    ///
    /// Stale and duplicate indices are ignored. Once a terminal event has
    /// been released every later call yields nothing.
    pub fn accept(&mut self, index: u64, event: BodyEvent) -> Result<Ready<'_>, FetchError> {
        if self.finished {
            tracing::trace!(index, "Ignoring event after terminal");
            return Ok(Ready { inner: self });
        }

        if index < self.next_expected || self.pending.contains_key(&index) {
            tracing::debug!(index, next_expected = self.next_expected, "Ignoring duplicate event");
            return Ok(Ready { inner: self });
        }

        if let Some(limit) = self.max_pending {
            if index != self.next_expected && self.pending.len() >= limit {
                return Err(FetchError::ReorderOverflow { limit });
            }
        }

        self.pending.insert(index, event);
        self.high_water = self.high_water.max(self.pending.len());
        Ok(Ready { inner: self })
    }

    /// Index the next released event must carry.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Events waiting for a lower index.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Largest number of events buffered at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// True once `Done` or `Error` has been released.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn pop_ready(&mut self) -> Option<Released> {
        if self.finished {
            return None;
        }
        let event = self.pending.remove(&self.next_expected)?;
        self.next_expected += 1;

        let released = match event {
            BodyEvent::Response(header) => Released::Header(header),
            BodyEvent::Data(bytes) => Released::Chunk(bytes),
            BodyEvent::Done => {
                self.finished = true;
                Released::Done
            }
            BodyEvent::Error(message) => {
                self.finished = true;
                Released::Failed(message)
            }
        };
        if self.finished {
            self.pending.clear();
        }
        Some(released)
    }
}

/// Events made releasable by the last [`Reassembler::accept`].
pub struct Ready<'a> {
    inner: &'a mut Reassembler,
}

impl Iterator for Ready<'_> {
    type Item = Released;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.pop_ready()
    }
}

//! Fragmentation of data larger than one payload.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{Fragment, MAX_PAYLOAD_SIZE};
use crate::error::{ProtocolError, Result};

/// Fixed fields preceding fragment data (message ID, number, total, length).
pub const FRAGMENT_HEADER_SIZE: usize = 6;

/// Largest chunk that still fits one payload.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_SIZE - FRAGMENT_HEADER_SIZE;

/// Split `data` into numbered fragments of at most `chunk_size` bytes.
///
/// Empty data yields a single empty fragment.
pub fn split(message_id: u16, data: &[u8], chunk_size: usize) -> Result<Vec<Fragment>> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(ProtocolError::InvalidFragment(format!(
            "chunk size {chunk_size} outside 1..={MAX_CHUNK_SIZE}"
        ))
        .into());
    }

    let count = data.len().div_ceil(chunk_size).max(1);
    let total = u8::try_from(count).map_err(|_| {
        ProtocolError::InvalidFragment(format!("{count} fragments needed, at most 255 allowed"))
    })?;

    if data.is_empty() {
        return Ok(vec![Fragment {
            message_id,
            fragment_num: 0,
            total_fragments: 1,
            data: Vec::new(),
        }]);
    }

    Ok(data
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Fragment {
            message_id,
            fragment_num: i as u8,
            total_fragments: total,
            data: chunk.to_vec(),
        })
        .collect())
}

#[derive(Debug)]
struct Partial {
    parts: Vec<Option<Vec<u8>>>,
    received: usize,
    started: Instant,
}

impl Partial {
    fn new(total: u8) -> Self {
        Self {
            parts: vec![None; usize::from(total)],
            received: 0,
            started: Instant::now(),
        }
    }

    fn total(&self) -> usize {
        self.parts.len()
    }
}

/// Collects fragments until a message is complete.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u16, Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fragment. Returns the joined data once every part has arrived.
    ///
    /// A repeated fragment replaces the earlier copy.
    pub fn push(&mut self, fragment: Fragment) -> Result<Option<Vec<u8>>> {
        let total = fragment.total_fragments;
        if total == 0 {
            return Err(ProtocolError::InvalidFragment(format!(
                "message {} declares zero fragments",
                fragment.message_id
            ))
            .into());
        }
        if fragment.fragment_num >= total {
            return Err(ProtocolError::InvalidFragment(format!(
                "fragment {} of message {} out of range (total {total})",
                fragment.fragment_num, fragment.message_id
            ))
            .into());
        }

        let partial = self
            .pending
            .entry(fragment.message_id)
            .or_insert_with(|| Partial::new(total));

        if partial.total() != usize::from(total) {
            return Err(ProtocolError::InvalidFragment(format!(
                "message {} changed total from {} to {total}",
                fragment.message_id,
                partial.total()
            ))
            .into());
        }

        let slot = &mut partial.parts[usize::from(fragment.fragment_num)];
        if slot.is_none() {
            partial.received += 1;
        }
        *slot = Some(fragment.data);

        if partial.received < partial.total() {
            return Ok(None);
        }

        let Some(partial) = self.pending.remove(&fragment.message_id) else {
            return Ok(None);
        };
        Ok(Some(partial.parts.into_iter().flatten().flatten().collect()))
    }

    /// Drop partial messages whose first fragment arrived more than `age` ago.
    /// Returns how many were dropped.
    pub fn evict_older_than(&mut self, age: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, partial| partial.started.elapsed() <= age);
        before - self.pending.len()
    }

    /// Number of incomplete messages.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

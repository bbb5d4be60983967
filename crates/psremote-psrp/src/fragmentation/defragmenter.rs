use std::collections::HashMap;

use tracing::{trace, warn};

use super::fragment::Fragment;
use crate::{PsrpError, PsrpMessage};

/// Upper bound on partially received messages held at once.
pub const MAX_PENDING_MESSAGES: usize = 1024;

#[derive(Debug)]
struct PendingMessage {
    next_fragment_id: u64,
    data: Vec<u8>,
}

/// Reassembles inbound fragments into messages.
///
/// Partial messages are keyed by object id and survive across calls, since a message may
/// span several Receive responses. An entry is removed as soon as its end fragment arrives.
#[derive(Debug)]
pub struct Defragmenter {
    pending: HashMap<u64, PendingMessage>,
    max_pending: usize,
}

impl Default for Defragmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl Defragmenter {
    pub fn new() -> Self {
        Self::with_max_pending(MAX_PENDING_MESSAGES)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_pending,
        }
    }

    /// Processes one byte stream of concatenated fragments, returning the messages it completed
    /// in completion order.
    pub fn defragment(&mut self, stream: &[u8]) -> Result<Vec<PsrpMessage>, PsrpError> {
        let mut remaining = stream;
        let mut completed = Vec::new();

        while !remaining.is_empty() {
            let (fragment, rest) = Fragment::unpack(remaining)?;
            remaining = rest;

            if let Some(data) = self.accept(fragment)? {
                completed.push(PsrpMessage::parse(&data)?);
            }
        }

        Ok(completed)
    }

    /// Processes several streams in order against the same reassembly state.
    pub fn defragment_all<'s>(
        &mut self,
        streams: impl IntoIterator<Item = &'s [u8]>,
    ) -> Result<Vec<PsrpMessage>, PsrpError> {
        let mut completed = Vec::new();
        for stream in streams {
            completed.extend(self.defragment(stream)?);
        }
        Ok(completed)
    }

    /// Number of messages still waiting for fragments.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn accept(&mut self, fragment: Fragment) -> Result<Option<Vec<u8>>, PsrpError> {
        let object_id = fragment.object_id;
        trace!(
            object_id,
            fragment_id = fragment.fragment_id,
            start = fragment.start,
            end = fragment.end,
            "accepting fragment"
        );

        match (fragment.start, fragment.end) {
            (true, true) => {
                if self.pending.remove(&object_id).is_some() {
                    warn!(object_id, "discarding partial message replaced by a whole one");
                }
                Ok(Some(fragment.data))
            }
            (true, false) => {
                if !self.pending.contains_key(&object_id) && self.pending.len() >= self.max_pending
                {
                    return Err(PsrpError::Reassembly(
                        format!("more than {} partial messages pending", self.max_pending).into(),
                    ));
                }
                let next_fragment_id = successor(object_id, fragment.fragment_id)?;
                self.pending.insert(
                    object_id,
                    PendingMessage {
                        next_fragment_id,
                        data: fragment.data,
                    },
                );
                Ok(None)
            }
            (false, end) => {
                let Some(entry) = self.pending.get_mut(&object_id) else {
                    return Err(PsrpError::Reassembly(
                        format!("fragment for object {object_id} arrived without a start fragment")
                            .into(),
                    ));
                };

                if fragment.fragment_id != entry.next_fragment_id {
                    return Err(PsrpError::Reassembly(
                        format!(
                            "object {object_id}: expected fragment {}, got {}",
                            entry.next_fragment_id, fragment.fragment_id
                        )
                        .into(),
                    ));
                }

                entry.next_fragment_id = successor(object_id, fragment.fragment_id)?;
                entry.data.extend_from_slice(&fragment.data);

                if end {
                    Ok(self.pending.remove(&object_id).map(|entry| entry.data))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

fn successor(object_id: u64, fragment_id: u64) -> Result<u64, PsrpError> {
    fragment_id.checked_add(1).ok_or_else(|| {
        PsrpError::Reassembly(
            format!("object {object_id}: fragment id {fragment_id} overflows").into(),
        )
    })
}

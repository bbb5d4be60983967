use tracing::debug;

use super::fragment::{FRAGMENT_HEADER_LEN, Fragment};
use crate::{PsrpError, PsrpMessage};

/// Largest fragment accepted for an outbound message, header included.
///
/// Outbound messages are control and command text and always travel as a single
/// fragment; anything larger is refused instead of split.
pub const MAX_OUTBOUND_FRAGMENT: usize = 32_768;

/// Assigns object ids to outbound messages and frames each as one fragment.
#[derive(Debug)]
pub struct Fragmenter {
    next_object_id: u64,
}

impl Default for Fragmenter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Fragmenter {
    pub fn new(first_object_id: u64) -> Self {
        Self {
            next_object_id: first_object_id,
        }
    }

    /// The object id the next message will receive.
    pub fn next_object_id(&self) -> u64 {
        self.next_object_id
    }

    /// Frames `messages` in order, one start+end fragment each, and concatenates them.
    ///
    /// Fails without consuming any object id when a message would need more than one fragment.
    pub fn fragment(&mut self, messages: &[PsrpMessage]) -> Result<Vec<u8>, PsrpError> {
        let packed: Vec<Vec<u8>> = messages.iter().map(PsrpMessage::pack).collect();

        for data in &packed {
            let size = FRAGMENT_HEADER_LEN + data.len();
            if size > MAX_OUTBOUND_FRAGMENT {
                return Err(PsrpError::MessageTooLarge {
                    size,
                    limit: MAX_OUTBOUND_FRAGMENT,
                });
            }
        }

        let capacity = packed.iter().map(|d| d.len() + FRAGMENT_HEADER_LEN).sum();
        let mut out = Vec::with_capacity(capacity);
        for (message, data) in messages.iter().zip(packed) {
            let object_id = self.next_object_id;
            self.next_object_id += 1;

            debug!(
                object_id,
                message_type = message.message_type.name(),
                len = data.len(),
                "framing outbound message"
            );
            Fragment::whole(object_id, data).pack_into(&mut out);
        }

        Ok(out)
    }
}

/// Frames `messages` starting at `start_object_id`.
pub fn encode(start_object_id: u64, messages: &[PsrpMessage]) -> Result<Vec<u8>, PsrpError> {
    Fragmenter::new(start_object_id).fragment(messages)
}

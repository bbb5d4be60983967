use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use tracing::trace;

use crate::PsrpError;

pub const FRAGMENT_HEADER_LEN: usize = 21;

const FLAG_START: u8 = 0x01;
const FLAG_END: u8 = 0x02;

/// A single fragment of a PowerShell remoting message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub object_id: u64,
    pub fragment_id: u64,
    pub start: bool,
    pub end: bool,
    pub data: Vec<u8>,
}

impl Fragment {
    pub fn new(object_id: u64, fragment_id: u64, data: Vec<u8>, start: bool, end: bool) -> Self {
        Self {
            object_id,
            fragment_id,
            start,
            end,
            data,
        }
    }

    /// A fragment that carries a whole message.
    pub fn whole(object_id: u64, data: Vec<u8>) -> Self {
        Self::new(object_id, 0, data, true, true)
    }

    pub fn packed_len(&self) -> usize {
        FRAGMENT_HEADER_LEN + self.data.len()
    }

    /// Pack the fragment into wire format bytes.
    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.packed_len());
        self.pack_into(&mut buffer);
        buffer
    }

    pub fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.object_id.to_be_bytes());
        buffer.extend_from_slice(&self.fragment_id.to_be_bytes());

        let mut flags = 0u8;
        if self.start {
            flags |= FLAG_START;
        }
        if self.end {
            flags |= FLAG_END;
        }
        buffer.push(flags);

        buffer.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        buffer.extend_from_slice(&self.data);
    }

    /// Unpack one fragment from the front of `data`, returning it with the unread rest.
    pub fn unpack(data: &[u8]) -> Result<(Self, &[u8]), PsrpError> {
        if data.len() < FRAGMENT_HEADER_LEN {
            return Err(PsrpError::InvalidMessage(
                format!(
                    "Fragment too short, need at least {FRAGMENT_HEADER_LEN} bytes, got {}",
                    data.len()
                )
                .into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let object_id = cursor.read_u64::<BigEndian>()?;
        let fragment_id = cursor.read_u64::<BigEndian>()?;
        let flags = cursor.read_u8()?;
        let length = cursor.read_u32::<BigEndian>()? as usize;

        let start = (flags & FLAG_START) != 0;
        let end = (flags & FLAG_END) != 0;

        trace!(object_id, fragment_id, start, end, length, "unpacked fragment header");

        let Some(total) = FRAGMENT_HEADER_LEN.checked_add(length) else {
            return Err(PsrpError::InvalidMessage("Fragment length overflows".into()));
        };

        if data.len() < total {
            return Err(PsrpError::InvalidMessage(
                format!(
                    "Fragment data truncated: expected {total} bytes, got {}",
                    data.len()
                )
                .into(),
            ));
        }

        let fragment = Self::new(
            object_id,
            fragment_id,
            data[FRAGMENT_HEADER_LEN..total].to_vec(),
            start,
            end,
        );

        Ok((fragment, &data[total..]))
    }
}

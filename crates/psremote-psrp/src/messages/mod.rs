//! PSRP message header: destination, message type and the two GUIDs that precede the
//! CLIXML body inside a reassembled fragment payload.
mod message_type;

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use uuid::Uuid;

pub use message_type::MessageType;

use crate::{PsObjectWithType, PsrpError};

pub const MESSAGE_HEADER_LEN: usize = 40;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Client = 0x0000_0001,
    Server = 0x0000_0002,
}

impl TryFrom<u32> for Destination {
    type Error = PsrpError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0000_0001 => Ok(Destination::Client),
            0x0000_0002 => Ok(Destination::Server),
            _ => Err(PsrpError::InvalidMessage(
                format!("Unknown Destination value: 0x{value:08x}").into(),
            )),
        }
    }
}

/// A reassembled PSRP message.
///
/// GUIDs use the little-endian (Windows `GUID`) byte layout on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsrpMessage {
    pub destination: Destination,
    pub message_type: MessageType,
    /// Runspace pool id.
    pub rpid: Uuid,
    /// Pipeline id, nil for pool-level messages.
    pub pid: Uuid,
    pub data: Vec<u8>,
}

impl PsrpMessage {
    /// A message addressed to the server.
    pub fn new(message_type: MessageType, rpid: Uuid, pid: Uuid, data: Vec<u8>) -> Self {
        Self {
            destination: Destination::Server,
            message_type,
            rpid,
            pid,
            data,
        }
    }

    pub fn from_ps_object(
        object: &dyn PsObjectWithType,
        rpid: Uuid,
        pid: Uuid,
    ) -> Result<Self, PsrpError> {
        let data = object.to_ps_object().to_xml_string()?.into_bytes();
        Ok(Self::new(object.message_type(), rpid, pid, data))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MESSAGE_HEADER_LEN + self.data.len());
        buffer.extend_from_slice(&(self.destination as u32).to_le_bytes());
        buffer.extend_from_slice(&self.message_type.value().to_le_bytes());
        buffer.extend_from_slice(&self.rpid.to_bytes_le());
        buffer.extend_from_slice(&self.pid.to_bytes_le());
        buffer.extend_from_slice(&self.data);
        buffer
    }

    pub fn parse(data: &[u8]) -> Result<Self, PsrpError> {
        if data.len() < MESSAGE_HEADER_LEN {
            return Err(PsrpError::InvalidMessage(
                format!(
                    "message header needs {MESSAGE_HEADER_LEN} bytes, got {}",
                    data.len()
                )
                .into(),
            ));
        }

        let mut cursor = Cursor::new(data);
        let destination = Destination::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let message_type = MessageType::from(cursor.read_u32::<LittleEndian>()?);

        let mut rpid = [0u8; 16];
        cursor.read_exact(&mut rpid)?;
        let mut pid = [0u8; 16];
        cursor.read_exact(&mut pid)?;

        Ok(Self {
            destination,
            message_type,
            rpid: Uuid::from_bytes_le(rpid),
            pid: Uuid::from_bytes_le(pid),
            data: data[MESSAGE_HEADER_LEN..].to_vec(),
        })
    }

    /// The CLIXML body as text, without a leading byte-order mark.
    pub fn body(&self) -> Result<&str, PsrpError> {
        let data = self.data.strip_prefix(UTF8_BOM).unwrap_or(&self.data);
        Ok(std::str::from_utf8(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_uses_little_endian_guids() {
        let rpid = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let message =
            PsrpMessage::new(MessageType::CreatePipeline, rpid, Uuid::nil(), b"<x/>".to_vec());
        let packed = message.pack();

        assert_eq!(&packed[0..4], &[2, 0, 0, 0]);
        assert_eq!(&packed[4..8], &0x0002_1006u32.to_le_bytes());
        assert_eq!(
            &packed[8..24],
            &[
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
                0xee, 0xff
            ]
        );
        assert_eq!(&packed[24..40], &[0; 16]);
        assert_eq!(&packed[40..], b"<x/>");

        assert_eq!(PsrpMessage::parse(&packed).unwrap(), message);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let message =
            PsrpMessage::new(MessageType::PipelineOutput, Uuid::nil(), Uuid::nil(), Vec::new());
        let mut packed = message.pack();
        packed[4..8].copy_from_slice(&0x0004_7777u32.to_le_bytes());

        let parsed = PsrpMessage::parse(&packed).unwrap();
        assert_eq!(parsed.message_type, MessageType::Unknown(0x0004_7777));
        assert_eq!(parsed.message_type.value(), 0x0004_7777);
    }

    #[test]
    fn test_body_strips_bom() {
        let mut data = UTF8_BOM.to_vec();
        data.extend_from_slice(b"<S>hi</S>");
        let message = PsrpMessage::new(MessageType::PipelineOutput, Uuid::nil(), Uuid::nil(), data);
        assert_eq!(message.body().unwrap(), "<S>hi</S>");
    }

    #[test]
    fn test_short_header_is_rejected() {
        assert!(matches!(
            PsrpMessage::parse(&[2, 0, 0, 0]),
            Err(PsrpError::InvalidMessage(_))
        ));
    }
}

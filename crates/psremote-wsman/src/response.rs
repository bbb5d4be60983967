use base64::{Engine as _, engine::general_purpose::STANDARD};
use psremote_xml::parser::{self, Node, NodeExt};
use tracing::{debug, warn};

use crate::SoapError;

/// Local part of the fault subcode WinRM returns when a long poll expires.
pub const TIMED_OUT_SUBCODE: &str = "TimedOut";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// Subcode as sent, prefix included (`w:TimedOut`).
    pub subcode: String,
    pub reason: String,
    pub detail: String,
}

impl SoapFault {
    pub fn is_timeout(&self) -> bool {
        let local = self
            .subcode
            .rsplit_once(':')
            .map_or(self.subcode.as_str(), |(_, local)| local);
        local == TIMED_OUT_SUBCODE
    }

    /// Reason and detail joined for display.
    pub fn message(&self) -> String {
        if self.detail.is_empty() {
            self.reason.clone()
        } else {
            format!("{}\n{}", self.reason, self.detail)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveResponse {
    /// Decoded stream payloads in document order.
    pub streams: Vec<Vec<u8>>,
    /// `CommandState/@State`, empty while the command is still running.
    pub command_state: String,
}

impl ReceiveResponse {
    pub fn is_done(&self) -> bool {
        !self.command_state.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapResponse {
    Fault(SoapFault),
    Receive(ReceiveResponse),
    Create,
    Command,
    Signal,
    Delete,
    /// An action this client does not interpret, kept verbatim.
    Unknown(String),
}

impl SoapResponse {
    pub fn parse(xml: &str) -> Result<Self, SoapError> {
        let document = parser::parse(xml)?;
        let envelope = document.root_element();

        let action = envelope
            .child("Header")
            .and_then(|header| header.child("Action"))
            .map(|action| action.text_or_empty().trim())
            .unwrap_or_default();
        let body = envelope.child("Body");

        debug!(action, "classifying response");

        let response = if action.ends_with("wsman/fault") {
            let fault = body
                .and_then(|body| body.child("Fault"))
                .ok_or(SoapError::MissingElement("Fault"))?;
            Self::Fault(parse_fault(fault))
        } else if action.ends_with("shell/ReceiveResponse") {
            let receive = body
                .and_then(|body| body.child("ReceiveResponse"))
                .ok_or(SoapError::MissingElement("ReceiveResponse"))?;
            Self::Receive(parse_receive(receive)?)
        } else if action.ends_with("transfer/CreateResponse") {
            Self::Create
        } else if action.ends_with("shell/SignalResponse") {
            Self::Signal
        } else if action.ends_with("transfer/DeleteResponse") {
            Self::Delete
        } else if action.ends_with("shell/CommandResponse") {
            Self::Command
        } else {
            warn!(action, "unrecognized response action");
            Self::Unknown(xml.to_owned())
        };

        Ok(response)
    }
}

fn parse_fault(fault: Node<'_, '_>) -> SoapFault {
    let subcode = fault
        .child("Code")
        .and_then(|code| code.child("Subcode"))
        .and_then(|subcode| subcode.child("Value"))
        .map(|value| value.text_or_empty().trim().to_owned())
        .unwrap_or_default();

    let reason = fault
        .child("Reason")
        .and_then(|reason| reason.child("Text"))
        .map(|text| text.text_or_empty().trim().to_owned())
        .unwrap_or_default();

    let detail = fault
        .child("Detail")
        .and_then(|detail| detail.descendant("Message"))
        .map(|message| message.deep_text().trim().to_owned())
        .unwrap_or_default();

    SoapFault {
        subcode,
        reason,
        detail,
    }
}

fn parse_receive(receive: Node<'_, '_>) -> Result<ReceiveResponse, SoapError> {
    let streams = receive
        .children_named("Stream")
        .into_iter()
        .map(|stream| {
            let text: String = stream
                .text_or_empty()
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            STANDARD.decode(text).map_err(|source| SoapError::Base64 {
                element: "Stream",
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let command_state = receive
        .child("CommandState")
        .and_then(|state| state.attribute("State"))
        .unwrap_or_default()
        .to_owned();

    Ok(ReceiveResponse {
        streams,
        command_state,
    })
}

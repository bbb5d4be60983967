//! Text extraction for the inbound message kinds a command's output is rendered from.
use psremote_xml::parser::{self, Node, NodeExt};
use tracing::{debug, warn};

use crate::{MessageType, PsrpError, PsrpMessage, escape::decode_escaped};

/// Rendering of an error record that carries no text of its own.
const UNKNOWN_ERROR: &str = "unknown error";

/// Text carried by one inbound PSRP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsrpRecord {
    Output(String),
    Error(String),
    Warning(String),
    /// `newline` is false when the writer asked for no trailing newline.
    Information { text: String, newline: bool },
    Verbose(String),
    Progress(String),
}

/// Extracts the renderable records from `message`.
///
/// Message kinds without a text rendering yield nothing.
pub fn extract_records(message: &PsrpMessage) -> Result<Vec<PsrpRecord>, PsrpError> {
    let interpreted = matches!(
        message.message_type,
        MessageType::PipelineOutput
            | MessageType::ErrorRecord
            | MessageType::WarningRecord
            | MessageType::VerboseRecord
            | MessageType::InformationRecord
            | MessageType::ProgressRecord
            | MessageType::PipelineState
    );
    if !interpreted {
        debug!(
            message_type = message.message_type.name(),
            code = format_args!("0x{:08x}", message.message_type.value()),
            "ignoring message"
        );
        return Ok(Vec::new());
    }

    let body = message.body()?;
    let document = parser::parse(body)?;
    let root = document.root_element();

    let records = match message.message_type {
        MessageType::PipelineOutput => optional(output_text(root)?, PsrpRecord::Output),
        MessageType::ErrorRecord => vec![PsrpRecord::Error(error_text(root)?)],
        MessageType::WarningRecord => optional(to_string(root)?, PsrpRecord::Warning),
        MessageType::VerboseRecord => optional(to_string(root)?, PsrpRecord::Verbose),
        MessageType::InformationRecord => information(root)?.into_iter().collect(),
        MessageType::ProgressRecord => progress(root)?,
        MessageType::PipelineState => optional(pipeline_exception(root)?, PsrpRecord::Error),
        _ => Vec::new(),
    };

    if records.is_empty() && !matches!(message.message_type, MessageType::PipelineState) {
        warn!(
            message_type = message.message_type.name(),
            "message carried no renderable text"
        );
    }

    Ok(records)
}

fn optional(text: Option<String>, record: fn(String) -> PsrpRecord) -> Vec<PsrpRecord> {
    text.map(record).into_iter().collect()
}

fn output_text(root: Node<'_, '_>) -> Result<Option<String>, PsrpError> {
    if root.tag_name().name() == "S" {
        return decode_escaped(root.text_or_empty()).map(Some);
    }
    to_string(root)
}

fn to_string(root: Node<'_, '_>) -> Result<Option<String>, PsrpError> {
    root.child("ToString")
        .map(|n| decode_escaped(n.text_or_empty()))
        .transpose()
}

fn information(root: Node<'_, '_>) -> Result<Option<PsrpRecord>, PsrpError> {
    let Some(members) = root.child("MS") else {
        return Ok(None);
    };

    // Write-Host wraps its text in a HostInformationMessage; Write-Information may send a
    // bare string.
    if let Some(data) = members
        .children()
        .find(|n| n.is_element() && n.attribute("N") == Some("MessageData"))
        .filter(|n| n.tag_name().name() == "S")
    {
        return Ok(Some(PsrpRecord::Information {
            text: decode_escaped(data.text_or_empty())?,
            newline: true,
        }));
    }

    let Some(props) = members.child("Obj").and_then(|data| data.child("Props")) else {
        return Ok(None);
    };

    let text = props.child("S").map(|n| n.text_or_empty()).unwrap_or_default();
    let newline = props.child("B").is_none_or(|n| n.text() == Some("false"));

    Ok(Some(PsrpRecord::Information {
        text: decode_escaped(text)?,
        newline,
    }))
}

fn progress(root: Node<'_, '_>) -> Result<Vec<PsrpRecord>, PsrpError> {
    let Some(members) = root.child("MS") else {
        return Ok(Vec::new());
    };

    members
        .children_named("S")
        .iter()
        .map(|n| decode_escaped(n.text_or_empty()).map(PsrpRecord::Progress))
        .collect()
}

fn pipeline_exception(root: Node<'_, '_>) -> Result<Option<String>, PsrpError> {
    let Some(members) = root.child("MS") else {
        return Ok(None);
    };

    members
        .children_named("Obj")
        .into_iter()
        .find(|n| n.attribute("N") == Some("ExceptionAsErrorRecord"))
        .map_or(Ok(None), |n| error_text(n).map(Some))
}

fn error_text(root: Node<'_, '_>) -> Result<String, PsrpError> {
    Ok(to_string(root)?.unwrap_or_else(|| UNKNOWN_ERROR.to_owned()))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn message(message_type: MessageType, body: &str) -> PsrpMessage {
        PsrpMessage::new(message_type, Uuid::nil(), Uuid::nil(), body.as_bytes().to_vec())
    }

    #[test]
    fn test_pipeline_output_string() {
        let records = extract_records(&message(
            MessageType::PipelineOutput,
            "<S>Hello_x0020_world</S>",
        ))
        .unwrap();
        assert_eq!(records, vec![PsrpRecord::Output("Hello world".into())]);
    }

    #[test]
    fn test_error_record_uses_to_string() {
        let body = r#"<Obj RefId="0"><TN RefId="0"><T>System.Management.Automation.ErrorRecord</T></TN><ToString>Cannot find path 'C:\nope'</ToString><MS><B N="WasThrownFromThrowStatement">false</B></MS></Obj>"#;
        let records = extract_records(&message(MessageType::ErrorRecord, body)).unwrap();
        assert_eq!(records, vec![PsrpRecord::Error("Cannot find path 'C:\\nope'".into())]);
    }

    #[test]
    fn test_error_record_without_text() {
        let body = r#"<Obj RefId="0"><MS><B N="WasThrownFromThrowStatement">true</B></MS></Obj>"#;
        let records = extract_records(&message(MessageType::ErrorRecord, body)).unwrap();
        assert_eq!(records, vec![PsrpRecord::Error("unknown error".into())]);

        let body = r#"<Obj RefId="0"><MS><I32 N="PipelineState">3</I32><Obj N="ExceptionAsErrorRecord" RefId="1"><MS/></Obj></MS></Obj>"#;
        let records = extract_records(&message(MessageType::PipelineState, body)).unwrap();
        assert_eq!(records, vec![PsrpRecord::Error("unknown error".into())]);
    }

    #[test]
    fn test_information_record_from_write_host() {
        let body = r#"<Obj RefId="0"><MS><Obj N="MessageData" RefId="1"><TN RefId="1"><T>System.Management.Automation.HostInformationMessage</T></TN><ToString>hi</ToString><Props><S N="Message">hi</S><B N="NoNewLine">true</B><Obj N="ForegroundColor" RefId="2"><I32>10</I32></Obj></Props></Obj><S N="Source">Write-Host</S></MS></Obj>"#;
        let records = extract_records(&message(MessageType::InformationRecord, body)).unwrap();
        assert_eq!(
            records,
            vec![PsrpRecord::Information {
                text: "hi".into(),
                newline: false
            }]
        );
    }

    #[test]
    fn test_information_record_with_plain_message_data() {
        let body = r#"<Obj RefId="0"><MS><S N="MessageData">note</S><S N="Source">Write-Information</S></MS></Obj>"#;
        let records = extract_records(&message(MessageType::InformationRecord, body)).unwrap();
        assert_eq!(
            records,
            vec![PsrpRecord::Information {
                text: "note".into(),
                newline: true
            }]
        );
    }

    #[test]
    fn test_progress_record_yields_each_string() {
        let body = r#"<Obj RefId="0"><MS><S N="Activity">Copying</S><I32 N="ActivityId">1</I32><S N="StatusDescription">50%</S></MS></Obj>"#;
        let records = extract_records(&message(MessageType::ProgressRecord, body)).unwrap();
        assert_eq!(
            records,
            vec![
                PsrpRecord::Progress("Copying".into()),
                PsrpRecord::Progress("50%".into())
            ]
        );
    }

    #[test]
    fn test_pipeline_state_with_exception() {
        let body = r#"<Obj RefId="0"><MS><I32 N="PipelineState">3</I32><Obj N="ExceptionAsErrorRecord" RefId="1"><ToString>The term 'nope' is not recognized</ToString></Obj></MS></Obj>"#;
        let records = extract_records(&message(MessageType::PipelineState, body)).unwrap();
        assert_eq!(
            records,
            vec![PsrpRecord::Error("The term 'nope' is not recognized".into())]
        );
    }

    #[test]
    fn test_completed_pipeline_state_has_no_records() {
        let body = r#"<Obj RefId="0"><MS><I32 N="PipelineState">4</I32></MS></Obj>"#;
        assert!(extract_records(&message(MessageType::PipelineState, body)).unwrap().is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_uninterpreted_types_are_skipped_without_parsing() {
        let records = extract_records(&message(MessageType::RunspacepoolState, "not xml")).unwrap();
        assert!(records.is_empty());
        let records = extract_records(&message(MessageType::Unknown(0xdead), "not xml")).unwrap();
        assert!(records.is_empty());
        assert!(logs_contain("ignoring message"));
        assert!(logs_contain("0x0000dead"));
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        assert!(extract_records(&message(MessageType::WarningRecord, "<Obj>")).is_err());
    }
}

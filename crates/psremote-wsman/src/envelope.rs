//! Request envelopes for the five remote shell actions.
use base64::{Engine as _, engine::general_purpose::STANDARD};
use psremote_xml::builder::{Attribute, Builder, Element, XML_NAMESPACE};
use tracing::trace;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::{
    SoapError,
    namespaces::{
        ANONYMOUS_ADDRESS, MS_WS_MANAGEMENT, POWERSHELL, POWERSHELL_RESOURCE_URI, SIGNAL_CTRL_C,
        SOAP_ENVELOPE, WINDOWS_SHELL, WS_ADDRESSING, WS_MANAGEMENT,
    },
};

pub const DEFAULT_OPERATION_TIMEOUT: u32 = 5;
pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 64_000;
pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapAction {
    Create,
    Command,
    Receive,
    Signal,
    Delete,
}

impl SoapAction {
    pub fn uri(self) -> &'static str {
        match self {
            Self::Create => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create",
            Self::Delete => "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete",
            Self::Receive => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive",
            Self::Command => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command",
            Self::Signal => "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal",
        }
    }
}

/// Formats an id the way WinRM writes them: `uuid:` followed by the uppercase hyphenated form.
pub fn wsman_uuid(id: Uuid) -> String {
    format!("uuid:{id:X}")
}

/// Per-shell envelope parameters.
///
/// Each envelope gets a fresh message id; everything else is fixed for the shell's life.
#[derive(Debug, Clone, TypedBuilder)]
pub struct WsManRequest {
    #[builder(setter(into))]
    to: String,
    session_id: Uuid,
    shell_id: Uuid,
    #[builder(default = DEFAULT_OPERATION_TIMEOUT)]
    operation_timeout: u32,
    #[builder(default = DEFAULT_MAX_ENVELOPE_SIZE)]
    max_envelope_size: u32,
    #[builder(default = DEFAULT_LOCALE.to_owned(), setter(into))]
    locale: String,
}

struct WsOption {
    name: &'static str,
    value: &'static str,
    must_comply: bool,
}

impl WsManRequest {
    pub fn shell_id(&self) -> Uuid {
        self.shell_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Creates the shell, carrying the runspace pool creation fragments.
    pub fn create(&self, creation: &[u8]) -> Result<String, SoapError> {
        let shell = Element::new("Shell")
            .set_namespace(WINDOWS_SHELL)
            .add_attribute(Attribute::new("ShellId", format!("{:X}", self.shell_id)))
            .add_child(
                Element::new("InputStreams")
                    .set_namespace(WINDOWS_SHELL)
                    .set_text("stdin pr"),
            )
            .add_child(
                Element::new("OutputStreams")
                    .set_namespace(WINDOWS_SHELL)
                    .set_text("stdout"),
            )
            .add_child(
                Element::new("creationXml")
                    .add_namespace_declaration(POWERSHELL, None)
                    .set_namespace(POWERSHELL)
                    .set_text(STANDARD.encode(creation)),
            );

        let options = [WsOption {
            name: "protocolversion",
            value: "2.3",
            must_comply: true,
        }];

        self.envelope(SoapAction::Create, Uuid::new_v4(), &options, Some(shell))
    }

    /// Starts a pipeline; `arguments` holds the pipeline creation fragments.
    pub fn command(&self, command_id: Uuid, arguments: &[u8]) -> Result<String, SoapError> {
        let command_line = Element::new("CommandLine")
            .set_namespace(WINDOWS_SHELL)
            .add_attribute(Attribute::new("CommandId", format!("{command_id:X}")))
            .add_child(Element::new("Command").set_namespace(WINDOWS_SHELL))
            .add_child(
                Element::new("Arguments")
                    .set_namespace(WINDOWS_SHELL)
                    .set_text(STANDARD.encode(arguments)),
            );

        self.envelope(SoapAction::Command, Uuid::new_v4(), &[], Some(command_line))
    }

    /// Polls stdout, for one command or for the shell itself.
    pub fn receive(&self, command_id: Option<Uuid>) -> Result<String, SoapError> {
        let mut desired = Element::new("DesiredStream")
            .set_namespace(WINDOWS_SHELL)
            .set_text("stdout");
        if let Some(command_id) = command_id {
            desired = desired.add_attribute(Attribute::new("CommandId", format!("{command_id:X}")));
        }

        let receive = Element::new("Receive")
            .set_namespace(WINDOWS_SHELL)
            .add_child(desired);

        let options = [WsOption {
            name: "WSMAN_CMDSHELL_OPTION_KEEPALIVE",
            value: "True",
            must_comply: false,
        }];

        self.envelope(SoapAction::Receive, Uuid::new_v4(), &options, Some(receive))
    }

    /// Sends control-C to a running command.
    pub fn signal(&self, command_id: Uuid) -> Result<String, SoapError> {
        let signal = Element::new("Signal")
            .set_namespace(WINDOWS_SHELL)
            .add_attribute(Attribute::new("CommandId", format!("{command_id:X}")))
            .add_child(
                Element::new("Code")
                    .set_namespace(WINDOWS_SHELL)
                    .set_text(SIGNAL_CTRL_C),
            );

        self.envelope(SoapAction::Signal, Uuid::new_v4(), &[], Some(signal))
    }

    pub fn delete(&self) -> Result<String, SoapError> {
        self.envelope(SoapAction::Delete, Uuid::new_v4(), &[], None)
    }

    fn envelope(
        &self,
        action: SoapAction,
        message_id: Uuid,
        options: &[WsOption],
        body: Option<Element<'_>>,
    ) -> Result<String, SoapError> {
        let must_understand = |value: &'static str| {
            Attribute::new("mustUnderstand", value).set_namespace(SOAP_ENVELOPE)
        };
        let lang = || Attribute::new("lang", self.locale.as_str()).set_namespace(XML_NAMESPACE);

        let option_set = Element::new("OptionSet")
            .set_namespace(WS_MANAGEMENT)
            .add_attribute(must_understand("true"))
            .add_children(options.iter().map(|option| {
                let mut element = Element::new("Option")
                    .set_namespace(WS_MANAGEMENT)
                    .add_attribute(Attribute::new("Name", option.name))
                    .set_text(option.value);
                if option.must_comply {
                    element = element.add_attribute(Attribute::new("MustComply", "true"));
                }
                element
            }));

        let mut header = Element::new("Header")
            .set_namespace(SOAP_ENVELOPE)
            .add_child(
                Element::new("Action")
                    .set_namespace(WS_ADDRESSING)
                    .add_attribute(must_understand("true"))
                    .set_text(action.uri()),
            )
            .add_child(
                Element::new("DataLocale")
                    .set_namespace(MS_WS_MANAGEMENT)
                    .add_attribute(must_understand("false"))
                    .add_attribute(lang()),
            )
            .add_child(
                Element::new("Locale")
                    .set_namespace(WS_MANAGEMENT)
                    .add_attribute(must_understand("false"))
                    .add_attribute(lang()),
            )
            .add_child(
                Element::new("MaxEnvelopeSize")
                    .set_namespace(WS_MANAGEMENT)
                    .add_attribute(must_understand("true"))
                    .set_text(self.max_envelope_size.to_string()),
            )
            .add_child(
                Element::new("MessageID")
                    .set_namespace(WS_ADDRESSING)
                    .set_text(wsman_uuid(message_id)),
            )
            .add_child(
                Element::new("OperationTimeout")
                    .set_namespace(WS_MANAGEMENT)
                    .set_text(format!("PT{}S", self.operation_timeout)),
            )
            .add_child(
                Element::new("ReplyTo").set_namespace(WS_ADDRESSING).add_child(
                    Element::new("Address")
                        .set_namespace(WS_ADDRESSING)
                        .add_attribute(must_understand("true"))
                        .set_text(ANONYMOUS_ADDRESS),
                ),
            )
            .add_child(
                Element::new("ResourceURI")
                    .set_namespace(WS_MANAGEMENT)
                    .add_attribute(must_understand("true"))
                    .set_text(POWERSHELL_RESOURCE_URI),
            )
            .add_child(
                Element::new("SessionId")
                    .set_namespace(MS_WS_MANAGEMENT)
                    .add_attribute(must_understand("false"))
                    .set_text(wsman_uuid(self.session_id)),
            )
            .add_child(
                Element::new("To")
                    .set_namespace(WS_ADDRESSING)
                    .set_text(self.to.as_str()),
            )
            .add_child(option_set);

        // The shell has no id on the server until create succeeds.
        if action != SoapAction::Create {
            header = header.add_child(
                Element::new("SelectorSet")
                    .set_namespace(WS_MANAGEMENT)
                    .add_child(
                        Element::new("Selector")
                            .set_namespace(WS_MANAGEMENT)
                            .add_attribute(Attribute::new("Name", "ShellId"))
                            .set_text(format!("{:X}", self.shell_id)),
                    ),
            );
        }

        let mut soap_body = Element::new("Body").set_namespace(SOAP_ENVELOPE);
        if let Some(body) = body {
            soap_body = soap_body.add_child(body);
        }

        let envelope = Element::new("Envelope")
            .add_namespace_declaration(WINDOWS_SHELL, Some("rsp"))
            .add_namespace_declaration(SOAP_ENVELOPE, Some("s"))
            .add_namespace_declaration(WS_ADDRESSING, Some("wsa"))
            .add_namespace_declaration(WS_MANAGEMENT, Some("wsman"))
            .add_namespace_declaration(MS_WS_MANAGEMENT, Some("wsmv"))
            .set_namespace(SOAP_ENVELOPE)
            .add_child(header)
            .add_child(soap_body);

        let xml = Builder::new(envelope).to_xml_string()?;
        trace!(action = ?action, message_id = %message_id, len = xml.len(), "built envelope");
        Ok(xml)
    }
}

#[cfg(test)]
mod tests {
    use psremote_xml::parser::{self, NodeExt};

    use super::*;

    fn request() -> WsManRequest {
        WsManRequest::builder()
            .to("http://dc01.corp.local:5985/wsman")
            .session_id(Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap())
            .shell_id(Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap())
            .build()
    }

    #[test]
    fn test_common_headers() {
        let xml = request().delete().unwrap();
        let doc = parser::parse(&xml).unwrap();
        let header = doc.root_element().child("Header").unwrap();

        let action = header.child("Action").unwrap();
        assert_eq!(action.text(), Some(SoapAction::Delete.uri()));
        assert_eq!(action.attribute((SOAP_ENVELOPE, "mustUnderstand")), Some("true"));

        let locale = header.child("Locale").unwrap();
        assert_eq!(locale.attribute((XML_NAMESPACE, "lang")), Some("en-US"));
        assert_eq!(header.child("MaxEnvelopeSize").unwrap().text(), Some("64000"));
        assert_eq!(header.child("OperationTimeout").unwrap().text(), Some("PT5S"));
        assert_eq!(
            header.child("SessionId").unwrap().text(),
            Some("uuid:11111111-2222-3333-4444-555555555555")
        );
        assert_eq!(
            header.child("To").unwrap().text(),
            Some("http://dc01.corp.local:5985/wsman")
        );
        assert_eq!(
            header.descendant("Address").unwrap().text(),
            Some(ANONYMOUS_ADDRESS)
        );

        let message_id = header.child("MessageID").unwrap().text_or_empty();
        assert!(message_id.starts_with("uuid:"));
        assert_eq!(message_id, message_id.to_uppercase().replacen("UUID:", "uuid:", 1));

        let selector = header.child("SelectorSet").unwrap().child("Selector").unwrap();
        assert_eq!(selector.attribute("Name"), Some("ShellId"));
        assert_eq!(selector.text(), Some("AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE"));

        let body = doc.root_element().child("Body").unwrap();
        assert_eq!(body.children().count(), 0);
    }

    #[test]
    fn test_message_ids_are_fresh() {
        let request = request();
        let ids: Vec<String> = (0..2)
            .map(|_| {
                let xml = request.delete().unwrap();
                let doc = parser::parse(&xml).unwrap();
                doc.root_element()
                    .descendant("MessageID")
                    .unwrap()
                    .text_or_empty()
                    .to_owned()
            })
            .collect();
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_create_has_no_selector_and_carries_creation_xml() {
        let xml = request().create(b"fragments").unwrap();
        let doc = parser::parse(&xml).unwrap();
        let header = doc.root_element().child("Header").unwrap();

        assert!(header.child("SelectorSet").is_none());
        let option = header.child("OptionSet").unwrap().child("Option").unwrap();
        assert_eq!(option.attribute("Name"), Some("protocolversion"));
        assert_eq!(option.attribute("MustComply"), Some("true"));
        assert_eq!(option.text(), Some("2.3"));

        let shell = doc.root_element().descendant("Shell").unwrap();
        assert_eq!(shell.tag_name().namespace(), Some(WINDOWS_SHELL));
        assert_eq!(
            shell.attribute("ShellId"),
            Some("AAAAAAAA-BBBB-CCCC-DDDD-EEEEEEEEEEEE")
        );
        assert_eq!(shell.child("InputStreams").unwrap().text(), Some("stdin pr"));
        assert_eq!(shell.child("OutputStreams").unwrap().text(), Some("stdout"));

        let creation = shell.child("creationXml").unwrap();
        assert_eq!(creation.tag_name().namespace(), Some(POWERSHELL));
        assert_eq!(creation.text(), Some(STANDARD.encode(b"fragments").as_str()));
    }

    #[test]
    fn test_command_body() {
        let command_id = Uuid::parse_str("0f0e0d0c-0b0a-0908-0706-050403020100").unwrap();
        let xml = request().command(command_id, b"pipeline").unwrap();
        let doc = parser::parse(&xml).unwrap();

        let line = doc.root_element().descendant("CommandLine").unwrap();
        assert_eq!(
            line.attribute("CommandId"),
            Some("0F0E0D0C-0B0A-0908-0706-050403020100")
        );
        assert!(line.child("Command").is_some());
        assert_eq!(
            line.child("Arguments").unwrap().text(),
            Some(STANDARD.encode(b"pipeline").as_str())
        );
    }

    #[test]
    fn test_receive_keepalive_and_optional_command_scope() {
        let doc_xml = request().receive(None).unwrap();
        let doc = parser::parse(&doc_xml).unwrap();
        let option = doc.root_element().descendant("Option").unwrap();
        assert_eq!(option.attribute("Name"), Some("WSMAN_CMDSHELL_OPTION_KEEPALIVE"));
        assert_eq!(option.text(), Some("True"));

        let stream = doc.root_element().descendant("DesiredStream").unwrap();
        assert_eq!(stream.text(), Some("stdout"));
        assert_eq!(stream.attribute("CommandId"), None);

        let command_id = Uuid::new_v4();
        let scoped_xml = request().receive(Some(command_id)).unwrap();
        let scoped = parser::parse(&scoped_xml).unwrap();
        let stream = scoped.root_element().descendant("DesiredStream").unwrap();
        assert_eq!(
            stream.attribute("CommandId"),
            Some(format!("{command_id:X}").as_str())
        );
    }

    #[test]
    fn test_signal_code() {
        let command_id = Uuid::new_v4();
        let xml = request().signal(command_id).unwrap();
        let doc = parser::parse(&xml).unwrap();

        let header = doc.root_element().child("Header").unwrap();
        assert_eq!(header.child("Action").unwrap().text(), Some(SoapAction::Signal.uri()));
        assert!(header.child("OptionSet").unwrap().child("Option").is_none());

        let signal = doc.root_element().descendant("Signal").unwrap();
        assert_eq!(signal.child("Code").unwrap().text(), Some(SIGNAL_CTRL_C));
    }

    #[test]
    fn test_custom_timeout() {
        let request = WsManRequest::builder()
            .to("https://host:5986/wsman")
            .session_id(Uuid::new_v4())
            .shell_id(Uuid::new_v4())
            .operation_timeout(60)
            .build();
        let xml = request.receive(None).unwrap();
        assert!(xml.contains("PT60S"));
    }
}

use typed_builder::TypedBuilder;

use super::{PsObjectWithType, PsProperty, PsValue};
use crate::MessageType;

/// `System.Threading.ApartmentState.Unknown`.
const APARTMENT_STATE_UNKNOWN: i32 = 2;

/// All remote streams travel back to the client.
const REMOTE_STREAM_OPTIONS_ALL: i32 = 15;

fn prop(name: &str, value: impl Into<PsValue>) -> PsProperty {
    PsProperty::new(name, value.into())
}

/// Host description that tells the server there is no interactive host, so it never
/// issues host callbacks.
pub fn no_host_info() -> PsValue {
    PsValue::Object(vec![
        prop("_isHostNull", true),
        prop("_isHostUINull", true),
        prop("_isHostRawUINull", true),
        prop("_useRunspaceHost", true),
    ])
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct SessionCapability {
    #[builder(default = "2.3".to_owned())]
    pub protocol_version: String,
    #[builder(default = "2.0".to_owned())]
    pub ps_version: String,
    #[builder(default = "1.1.0.10".to_owned())]
    pub serialization_version: String,
}

impl Default for SessionCapability {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PsObjectWithType for SessionCapability {
    fn message_type(&self) -> MessageType {
        MessageType::SessionCapability
    }

    fn to_ps_object(&self) -> PsValue {
        PsValue::Object(vec![
            PsProperty::new("protocolversion", PsValue::Version(self.protocol_version.clone())),
            PsProperty::new("PSVersion", PsValue::Version(self.ps_version.clone())),
            PsProperty::new(
                "SerializationVersion",
                PsValue::Version(self.serialization_version.clone()),
            ),
        ])
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct InitRunspacePool {
    #[builder(default = 1)]
    pub min_runspaces: i32,
    #[builder(default = 1)]
    pub max_runspaces: i32,
    /// `PSThreadOptions.Default`.
    #[builder(default = 0)]
    pub thread_options: i32,
    #[builder(default = APARTMENT_STATE_UNKNOWN)]
    pub apartment_state: i32,
}

impl Default for InitRunspacePool {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PsObjectWithType for InitRunspacePool {
    fn message_type(&self) -> MessageType {
        MessageType::InitRunspacepool
    }

    fn to_ps_object(&self) -> PsValue {
        PsValue::Object(vec![
            prop("MinRunspaces", self.min_runspaces),
            prop("MaxRunspaces", self.max_runspaces),
            PsProperty::new("PSThreadOptions", PsValue::Enum(self.thread_options)),
            PsProperty::new("ApartmentState", PsValue::Enum(self.apartment_state)),
            PsProperty::new("HostInfo", no_host_info()),
            PsProperty::new("ApplicationArguments", PsValue::Nil),
        ])
    }
}

/// One command of a pipeline with its named arguments. A `None` value sends `$null`,
/// which the server treats as a present switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineCommand {
    pub name: String,
    pub arguments: Vec<(String, Option<String>)>,
}

impl PipelineCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    fn to_ps_object(&self) -> PsValue {
        let arguments = self
            .arguments
            .iter()
            .map(|(name, value)| {
                PsValue::Object(vec![
                    prop("N", name.as_str()),
                    prop("V", value.clone()),
                ])
            })
            .collect();

        let mut properties = vec![
            prop("Cmd", self.name.as_str()),
            PsProperty::new("Args", PsValue::List(arguments)),
            prop("IsScript", false),
            PsProperty::new("UseLocalScope", PsValue::Nil),
        ];

        // No stream is merged into another.
        for merge in [
            "MergeMyResult",
            "MergeToResult",
            "MergePreviousResults",
            "MergeError",
            "MergeWarning",
            "MergeVerbose",
            "MergeDebug",
            "MergeInformation",
        ] {
            properties.push(PsProperty::new(merge, PsValue::Enum(0)));
        }

        PsValue::Object(properties)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct CreatePipeline {
    pub commands: Vec<PipelineCommand>,
    #[builder(default = true)]
    pub no_input: bool,
    #[builder(default = false)]
    pub add_to_history: bool,
    #[builder(default = false)]
    pub is_nested: bool,
    #[builder(default = APARTMENT_STATE_UNKNOWN)]
    pub apartment_state: i32,
    #[builder(default = REMOTE_STREAM_OPTIONS_ALL)]
    pub remote_stream_options: i32,
}

impl CreatePipeline {
    /// `Invoke-Expression -Command <text> | Out-String -Stream`, so every result reaches the
    /// client as text lines.
    pub fn invoke_expression(text: &str) -> Self {
        Self::builder()
            .commands(vec![
                PipelineCommand::new("Invoke-Expression")
                    .with_argument("Command", Some(text.to_owned())),
                PipelineCommand::new("Out-String").with_argument("Stream", None),
            ])
            .build()
    }
}

impl PsObjectWithType for CreatePipeline {
    fn message_type(&self) -> MessageType {
        MessageType::CreatePipeline
    }

    fn to_ps_object(&self) -> PsValue {
        let power_shell = PsValue::Object(vec![
            prop("IsNested", false),
            prop("RedirectShellErrorOutputPipe", false),
            PsProperty::new("ExtraCmds", PsValue::Nil),
            PsProperty::new("History", PsValue::Nil),
            PsProperty::new(
                "Cmds",
                PsValue::List(self.commands.iter().map(PipelineCommand::to_ps_object).collect()),
            ),
        ]);

        PsValue::Object(vec![
            prop("NoInput", self.no_input),
            prop("AddToHistory", self.add_to_history),
            prop("IsNested", self.is_nested),
            PsProperty::new("ApartmentState", PsValue::Enum(self.apartment_state)),
            PsProperty::new("RemoteStreamOptions", PsValue::Enum(self.remote_stream_options)),
            PsProperty::new("HostInfo", no_host_info()),
            PsProperty::new("PowerShell", power_shell),
        ])
    }
}

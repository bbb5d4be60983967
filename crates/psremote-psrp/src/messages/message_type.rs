macro_rules! message_types {
    ($($variant:ident = $value:literal),+ $(,)?) => {
        /// PSRP message type codes (MS-PSRP 2.2.1).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($variant,)+
            /// A code this client does not interpret.
            Unknown(u32),
        }

        impl MessageType {
            pub fn value(&self) -> u32 {
                match self {
                    $(MessageType::$variant => $value,)+
                    MessageType::Unknown(value) => *value,
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(MessageType::$variant => stringify!($variant),)+
                    MessageType::Unknown(_) => "Unknown",
                }
            }
        }

        impl From<u32> for MessageType {
            fn from(value: u32) -> Self {
                match value {
                    $($value => MessageType::$variant,)+
                    other => MessageType::Unknown(other),
                }
            }
        }
    };
}

message_types! {
    SessionCapability = 0x0001_0002,
    InitRunspacepool = 0x0001_0004,
    PublicKey = 0x0001_0005,
    EncryptedSessionKey = 0x0001_0006,
    PublicKeyRequest = 0x0001_0007,
    ConnectRunspacepool = 0x0001_0008,
    RunspacepoolInitData = 0x0002_100B,
    ResetRunspaceState = 0x0002_100C,
    SetMaxRunspaces = 0x0002_1002,
    SetMinRunspaces = 0x0002_1003,
    RunspaceAvailability = 0x0002_1004,
    RunspacepoolState = 0x0002_1005,
    CreatePipeline = 0x0002_1006,
    GetAvailableRunspaces = 0x0002_1007,
    UserEvent = 0x0002_1008,
    ApplicationPrivateData = 0x0002_1009,
    GetCommandMetadata = 0x0002_100A,
    RunspacepoolHostCall = 0x0002_1100,
    RunspacepoolHostResponse = 0x0002_1101,
    PipelineInput = 0x0004_1002,
    EndOfPipelineInput = 0x0004_1003,
    PipelineOutput = 0x0004_1004,
    ErrorRecord = 0x0004_1005,
    PipelineState = 0x0004_1006,
    DebugRecord = 0x0004_1007,
    VerboseRecord = 0x0004_1008,
    WarningRecord = 0x0004_1009,
    ProgressRecord = 0x0004_1010,
    InformationRecord = 0x0004_1011,
    PipelineHostCall = 0x0004_1100,
    PipelineHostResponse = 0x0004_1101,
}

#[cfg(test)]
mod tests {
    use super::MessageType;

    #[test]
    fn test_codes_decode_to_their_variant() {
        for message_type in [
            MessageType::SessionCapability,
            MessageType::RunspacepoolInitData,
            MessageType::ProgressRecord,
            MessageType::PipelineHostResponse,
        ] {
            assert_eq!(MessageType::from(message_type.value()), message_type);
        }
        assert_eq!(MessageType::from(0x0004_1006).name(), "PipelineState");
    }
}

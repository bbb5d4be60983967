use psremote_psrp::PsrpRecord;

/// One item of a command's output sequence.
///
/// Remote faults and pipeline exceptions arrive as [`OutputRecord::Error`]; the session stays
/// usable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputRecord {
    Stdout(String),
    Error(String),
    Warning(String),
    Info { text: String, newline: bool },
    Verbose(String),
    Progress(String),
    /// The server's long poll expired with the command still running. Counts consecutive
    /// expiries and restarts from 1 once data arrives.
    Timeout(u32),
}

impl From<PsrpRecord> for OutputRecord {
    fn from(record: PsrpRecord) -> Self {
        match record {
            PsrpRecord::Output(text) => OutputRecord::Stdout(text),
            PsrpRecord::Error(text) => OutputRecord::Error(text),
            PsrpRecord::Warning(text) => OutputRecord::Warning(text),
            PsrpRecord::Information { text, newline } => OutputRecord::Info { text, newline },
            PsrpRecord::Verbose(text) => OutputRecord::Verbose(text),
            PsrpRecord::Progress(text) => OutputRecord::Progress(text),
        }
    }
}

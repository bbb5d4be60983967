pub mod cancel;
pub mod command;
pub mod output;
pub mod session;

pub use cancel::CancellationToken;
pub use command::CommandOutput;
pub use output::OutputRecord;
pub use session::{RunspaceSession, SessionState};

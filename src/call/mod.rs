//! One phone call: session state, chat history and the path back to the caller.

pub mod conversation;
pub mod session;
pub mod transport;

pub use conversation::{ChatMessage, Conversation, Role};
pub use session::{CallIdentity, CallSession, CallSummary, SessionSettings};
pub use transport::{MediaTransport, RecordingTransport, TransportEvent, TwilioTransport};

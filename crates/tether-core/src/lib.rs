//! Core tether library (event parsing, stream transport, session lifecycle).

pub mod bridge;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod extract;
pub mod parser;
pub mod session;
pub mod store;
pub mod transport;
pub mod turn;

pub use bridge::{CompatibilityBridge, LegacyMessage};
pub use config::{Config, DispatchMode};
pub use dispatch::{handler_for_session, EventHandler, SessionUpdate};
pub use parser::{parse_line, ParseOutcome, ParsedEvent};
pub use session::{Session, SessionManager, SessionStatus};
pub use store::ConversationStore;
pub use transport::{
    CommandTransport, ConnectionState, StreamMessage, StreamOutcome, SubscriptionTransport,
};
pub use turn::TurnRunner;

//! Service layer: the relay facade, the messaging transport seam, chat
//! commands and greeting shortcuts.

pub mod commands;
pub mod greetings;
pub mod relay;
pub mod stdio;
pub mod transport;

pub use relay::Relay;
pub use stdio::StdioTransport;
pub use transport::MessagingTransport;

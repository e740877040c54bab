pub mod connection;
pub mod session;

pub use connection::{
    ConnectionState, TransportConfig, TransportEffect, TransportEvent, TransportMachine,
};
pub use session::{DropReason, FrameDecision, SessionController, SessionView};

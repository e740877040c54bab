pub mod connection;

pub use connection::{DEFAULT_HANDSHAKE_TIMEOUT, SocketHandle, validate_url};

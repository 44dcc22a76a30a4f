//! Networking: control protocol, framing, session state, and the TCP server

pub mod framing;
pub mod protocol;
pub mod server;
pub mod session;

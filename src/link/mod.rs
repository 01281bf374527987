//! Serial link module: wire protocol and the half-duplex transport

#[cfg(test)]
pub mod mock;
mod protocol;
mod transport;

pub use protocol::{Direction, InboundCommand, UnknownDirection};
pub use transport::{LinkConfig, LinkError, SerialLink, Transport};

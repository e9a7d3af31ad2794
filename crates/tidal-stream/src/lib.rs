//! tidal-stream: the streaming protocol over UDP.
//!
//! Both sides are built from the same pieces: a [`DatagramLink`] to the
//! peer, header negotiation, and a stop-and-wait chunk loop (transmit on
//! the server, receive on the client) bounded by the stall deadline.

pub mod client;
pub mod link;
pub mod negotiate;
pub mod receive;
pub mod server;
pub mod sink;
pub mod source;
pub mod transmit;

#[cfg(test)]
mod testing;

pub use client::{play, resolve, Playback};
pub use link::{DatagramLink, SessionLink, UdpLink};
pub use receive::ReceiveReport;
pub use server::{new_session_table, serve, Library, LibraryError, SessionTable, StreamServer};
pub use sink::{AudioSink, RawSink, WavSink};
pub use source::{open_wav, read_wav, AudioSource, RawSource, SourceError, WavSource};
pub use transmit::TransmitReport;

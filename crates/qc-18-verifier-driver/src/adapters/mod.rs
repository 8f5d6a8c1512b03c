//! Adapters between the broker and the domain layer.

pub mod demux;

pub use demux::ResponseDemultiplexer;

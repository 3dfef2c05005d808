//! gRPC service implementations.

pub mod receiver;
pub mod streamer;

pub use receiver::ReceiverService;
pub use streamer::StreamerService;

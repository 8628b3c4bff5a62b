pub mod request;
pub mod server;
pub mod sink;

pub use request::EntityRequest;
pub use server::{router, HttpServer};
pub use sink::{ChannelSink, ResponseHead, ResponseStart};

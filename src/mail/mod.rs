pub mod decoders;
pub mod message;

pub use message::parse_message;

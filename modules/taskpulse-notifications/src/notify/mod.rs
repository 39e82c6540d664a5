pub mod backend;
pub mod email;
pub mod push;
pub mod router;

pub use backend::{ChannelDispatcher, DispatchError};
pub use email::EmailRelay;
pub use push::PushGateway;
pub use router::Channels;

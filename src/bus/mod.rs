pub mod dispatcher;
pub mod pending;

pub use dispatcher::{BusConfig, CommandDispatcher, ResponseDecoder, ResponseSpec};
pub use pending::Pending;

pub mod connection;
pub mod dispatcher;
pub mod emitter;

pub use dispatcher::Dispatcher;
pub use emitter::Emitter;

mod handler;
mod message;
mod pump;

pub use handler::ws_handler;
pub use message::{LoggingHandler, MessageHandler};
pub use pump::{spawn_pumps, Pumps};

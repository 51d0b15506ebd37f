pub mod websocket_handler;

pub use websocket_handler::websocket_handler;

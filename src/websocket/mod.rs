mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{
    codes, ClientMessage, OutboundMessage, ResponseData, RoomIntent, RoomRequestData,
    ServerMessage,
};

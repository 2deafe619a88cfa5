mod heartbeat;

pub use heartbeat::{HeartbeatTask, PingRound};

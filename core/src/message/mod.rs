// Routed envelope and the frames that carry it

pub mod frame;
pub mod types;

pub use frame::{Frame, FrameError, Whoami};
pub use types::{now_millis, Message};

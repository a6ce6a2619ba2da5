//! Data models for support conversations

mod conversation;
mod message;

pub use conversation::*;
pub use message::*;

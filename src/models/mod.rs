//! Data models for chat entities

mod message;
mod presence;
mod receipt;
mod user;

pub use message::*;
pub use presence::*;
pub use receipt::*;
pub use user::*;

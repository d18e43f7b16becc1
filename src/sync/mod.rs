//! Realtime chat synchronization: the engine, its input buffer and typing
//! timer, and the driver that executes its commands.

pub mod composer;
pub mod driver;
pub mod engine;
pub mod error;
pub mod typing;

pub use driver::Driver;
pub use engine::{ChatContext, ChatSyncEngine, Command, Event, Panel, Phase};

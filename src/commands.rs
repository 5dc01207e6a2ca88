//! The washost CLI commands.

mod worker;

pub use self::worker::*;

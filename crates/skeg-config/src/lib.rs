//! Configuration loading for skeg
//!
//! Global configuration lives at `~/.config/skeg/config.toml`. Every field
//! has a default, so a missing file is never an error.

mod error;
mod global;

pub use error::*;
pub use global::*;

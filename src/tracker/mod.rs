pub mod chunk;
pub mod client;
pub mod columns;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod matcher;
pub mod missing;
pub mod model;
pub mod payload;
pub mod source;
pub mod sync;

pub use error::{Result, TrackerError};

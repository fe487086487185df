pub mod config;
pub mod error;
pub mod imaging;
pub mod service;
pub mod state;
pub mod workflow;

pub use error::{StudioError, StudioResult};
pub use workflow::Studio;

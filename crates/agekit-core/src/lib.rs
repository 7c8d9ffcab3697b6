//! agekit-core: configuration schema and error types shared by the agekit crates

pub mod config;
pub mod error;

pub use config::{AgekitConfig, ScryptConfig};
pub use error::{AgekitError, AgekitResult};

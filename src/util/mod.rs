//! Shared utilities

pub mod config;
pub mod context;
pub mod diagnostic;

pub use config::Config;
pub use context::{VintfContext, VintfContextBuilder};
pub use diagnostic::{BindDiagnostic, ManifestSyntaxError, MissingHalError};

pub mod state;

pub use state::{AppSettings, ConfigurationError, OnMissingCredential};

pub mod account;
pub mod admission;
pub mod auth;
pub mod clients;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod server;
pub mod translate;
pub mod usage;
pub mod validation;

pub use config::{ConfigStore, RuntimeConfig};
pub use error::{GatewayError, Result};
pub use logging::SharedJournal;
pub use server::{build_router, AppState};

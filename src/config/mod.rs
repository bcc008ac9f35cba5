//! Configuration
//!
//! `AppConfig` is persisted as TOML and cached behind `ArcSwap`.

mod schema;
mod store;

pub use schema::{AppConfig, RelayConfig};
pub use store::ConfigStore;

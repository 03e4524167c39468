//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) / CLI flags
//!     → loader.rs (parse & deserialize into TunnelConfig)
//!     → validation.rs (semantic checks, proxy env lookup)
//!     → EngineSettings (validated, immutable)
//!     → shared via Arc by engine, sessions and request workers
//! ```
//!
//! # Design Decisions
//! - Config is immutable once validated; no hot reload
//! - All fields have defaults to allow minimal configs
//! - Optional knobs become explicit enums (`Destination`, `StatusSink`)

pub mod loader;
pub mod schema;
pub mod settings;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{ObservabilityConfig, TimeoutConfig, TunnelConfig};
pub use settings::{Destination, EngineSettings, StatusSink};
pub use validation::{validate, validate_with_env, ValidationError};

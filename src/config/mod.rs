//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared by value/Arc with the admission, memory and recovery components
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload of limits
//! - All fields have defaults so an empty file is a valid config
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::GuardConfig;
pub use schema::MemoryConfig;
pub use schema::ObservabilityConfig;
pub use schema::RebalanceConfig;
pub use schema::RecoveryConfig;
pub use schema::ResourceLimits;
pub use schema::TierThresholds;
pub use validation::{validate_config, ValidationError};

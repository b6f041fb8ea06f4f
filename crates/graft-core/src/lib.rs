//! graft core
//!
//! Integrates one service into an existing deployment:
//! - Declares the service as a [`ServiceSpec`] (built in or loaded from TOML)
//! - Ensures its secrets, host name and activation tokens in the env store
//! - Inserts its service and volume blocks into the topology document
//! - Appends its route block to the routing document
//!
//! Runs are idempotent. A second run over the same files generates nothing
//! and writes nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use graft_core::{Integrator, ServiceSpec, StorePaths};
//!
//! # fn example() -> Result<(), graft_core::IntegrationError> {
//! let integrator = Integrator::new(ServiceSpec::vault_n8n(), StorePaths::in_dir("."));
//! let report = integrator.run()?;
//!
//! for (key, value) in &report.generated {
//!     println!("{key}={value}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![warn(missing_docs)]

pub mod error;
pub mod integrator;
pub mod phase;
pub mod report;
pub mod spec;

pub use error::{IntegrationError, IntegrationResult, PhaseContext};
pub use integrator::Integrator;
pub use phase::{allowed_transitions, validate_transition, Phase, PhaseTracker};
pub use report::{IntegrationReport, Outcome, StepRecord};
pub use spec::{
    EnvBinding, ServiceSpec, SetMember, StorePaths, ValueSource, VolumeSpec,
    DEFAULT_BASE_DOMAIN_KEY, FALLBACK_BASE_DOMAIN, NO_PROXY_KEY, PROFILES_KEY,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running integrations
    pub use crate::{
        IntegrationError, IntegrationReport, IntegrationResult, Integrator, Outcome, Phase,
        ServiceSpec, StorePaths,
    };
    pub use graft_store::{OsSecretGenerator, SecretGenerator};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

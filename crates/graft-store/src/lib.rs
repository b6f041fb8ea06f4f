//! graft store adapters
//!
//! Format-specific access to the three configuration stores an integration
//! run touches:
//!
//! - [`KeyValueStore`]: flat `KEY=value` environment file
//! - [`TopologyDocument`]: service topology (`docker-compose.yml`)
//! - [`RouteDocument`]: routing blocks (`Caddyfile`)
//!
//! Every adapter reads the whole file, mutates it in memory with
//! existence checks first, and writes back atomically. Unrelated content is
//! preserved byte for byte.
//!
//! # Example
//!
//! ```rust,no_run
//! use graft_store::{KeyValueStore, OpenMode, OsSecretGenerator, SecretGenerator};
//!
//! # fn example() -> Result<(), graft_store::StoreError> {
//! let mut env = KeyValueStore::load(".env", OpenMode::CreateIfMissing)?;
//! let gen = OsSecretGenerator::new();
//! let token = env.ensure("AUTH_TOKEN", || gen.generate(16))?;
//! env.ensure_set_member("COMPOSE_PROFILES", "vault-n8n")?;
//! env.save()?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod atomic;
pub mod env;
pub mod error;
pub mod route;
pub mod secret;
pub mod template;
pub mod topology;

pub use atomic::{stage, write_atomic, StagedWrite};
pub use env::{Ensured, KeyValueStore, OpenMode};
pub use error::{StoreError, StoreResult};
pub use route::RouteDocument;
pub use secret::{is_hex_of_len, OsSecretGenerator, SecretGenerator};
pub use template::{render, render_str, Params, TemplateError, TemplateKind};
pub use topology::TopologyDocument;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

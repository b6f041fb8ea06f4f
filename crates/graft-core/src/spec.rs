//! Service spec and store locations
//!
//! A [`ServiceSpec`] is the desired state for one service. It is built from
//! constants ([`ServiceSpec::vault_n8n`]) or loaded from TOML, and is never
//! written anywhere itself; only its effects on the stores are.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IntegrationError, IntegrationResult};

/// Key holding the deployment's base domain
pub const DEFAULT_BASE_DOMAIN_KEY: &str = "USER_DOMAIN_NAME";

/// Base domain used when the env store does not define one
pub const FALLBACK_BASE_DOMAIN: &str = "localhost";

/// Set-valued key listing the enabled compose profiles
pub const PROFILES_KEY: &str = "COMPOSE_PROFILES";

/// Set-valued key listing hosts that bypass the outbound proxy
pub const NO_PROXY_KEY: &str = "NO_PROXY";

/// Where an environment variable of the service gets its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ValueSource {
    /// Random hex secret stored under `key` in the env store
    Secret {
        /// Env store key
        key: String,
        /// Random bytes before hex encoding
        bytes: usize,
        /// Reject an existing value that is not hex of the right length
        #[serde(default)]
        strict: bool,
    },
    /// The derived host name, stored under the service's host-name key
    Hostname,
    /// Constant written directly into the service block
    Literal {
        /// Value
        value: String,
    },
}

/// Container environment variable and its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    /// Variable name inside the container
    pub var: String,
    /// Value source
    pub source: ValueSource,
}

impl EnvBinding {
    /// Random secret stored under `key`, exposed as `var`
    #[must_use]
    pub fn secret(var: impl Into<String>, key: impl Into<String>, bytes: usize) -> Self {
        Self {
            var: var.into(),
            source: ValueSource::Secret {
                key: key.into(),
                bytes,
                strict: false,
            },
        }
    }

    /// Constant value
    #[must_use]
    pub fn literal(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            source: ValueSource::Literal {
                value: value.into(),
            },
        }
    }

    /// Derived host name
    #[must_use]
    pub fn hostname(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            source: ValueSource::Hostname,
        }
    }

    /// Require an existing stored value to be well-formed hex
    #[must_use]
    pub fn strict(mut self) -> Self {
        if let ValueSource::Secret { strict, .. } = &mut self.source {
            *strict = true;
        }
        self
    }
}

/// Token that must be a member of a set-valued env key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMember {
    /// Env store key
    pub key: String,
    /// List token
    pub token: String,
}

/// Named volume and its mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name under `volumes:`
    pub name: String,
    /// Mount path inside the container
    pub mount: String,
}

/// Desired state of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service key under `services:`
    pub name: String,
    /// Container image reference
    pub image: String,
    /// Port the service listens on inside the network
    pub port: u16,
    /// Human label used for env section and route comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Container name, defaults to `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Env key receiving the derived host name, defaults to `<PREFIX>_HOSTNAME`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname_key: Option<String>,
    /// Route address token, defaults to `{$<hostname_key>}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_token: Option<String>,
    /// Env key holding the base domain
    #[serde(default = "default_base_domain_key")]
    pub base_domain_key: String,
    /// Volume block
    pub volume: VolumeSpec,
    /// Container environment
    #[serde(default)]
    pub env: Vec<EnvBinding>,
    /// Set-valued activation keys
    #[serde(default)]
    pub activation: Vec<SetMember>,
}

fn default_base_domain_key() -> String {
    DEFAULT_BASE_DOMAIN_KEY.to_string()
}

impl ServiceSpec {
    /// Minimal spec: volume `<name with _>_data` at `/data`, activated via
    /// `COMPOSE_PROFILES`, no environment
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let volume = format!("{}_data", name.replace('-', "_"));
        Self {
            activation: vec![SetMember {
                key: PROFILES_KEY.to_string(),
                token: name.clone(),
            }],
            name,
            image: image.into(),
            port,
            label: None,
            container_name: None,
            hostname_key: None,
            host_token: None,
            base_domain_key: default_base_domain_key(),
            volume: VolumeSpec {
                name: volume,
                mount: "/data".to_string(),
            },
            env: Vec::new(),
        }
    }

    /// Built-in spec for the vault-n8n secrets service
    #[must_use]
    pub fn vault_n8n() -> Self {
        Self::new("vault-n8n", "ghcr.io/vault-n8n/vault-n8n:latest", 8000)
            .with_label("Vault N8N")
            .with_volume("vault_n8n_data", "/app/data")
            .with_env(EnvBinding::secret("AUTH_TOKEN", "VAULT_N8N_AUTH_TOKEN", 16))
            .with_env(EnvBinding::secret("ENCRYPTION_KEY", "VAULT_N8N_ENCRYPTION_KEY", 32).strict())
            .with_env(EnvBinding::literal("DATABASE_PATH", "/app/data/secrets.db"))
            .with_activation(NO_PROXY_KEY, "vault-n8n")
    }

    /// Load and validate a spec from a TOML file
    ///
    /// # Errors
    /// - `IntegrationError::SpecFile` if the file cannot be read or parsed
    /// - `IntegrationError::InvalidSpec` if validation fails
    pub fn from_file(path: impl AsRef<Path>) -> IntegrationResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| IntegrationError::SpecFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let spec: Self = toml::from_str(&text).map_err(|e| IntegrationError::SpecFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `IntegrationError::InvalidSpec` if serialization fails
    pub fn to_toml(&self) -> IntegrationResult<String> {
        toml::to_string_pretty(self).map_err(|e| IntegrationError::InvalidSpec(e.to_string()))
    }

    /// Set the human label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the volume
    #[must_use]
    pub fn with_volume(mut self, name: impl Into<String>, mount: impl Into<String>) -> Self {
        self.volume = VolumeSpec {
            name: name.into(),
            mount: mount.into(),
        };
        self
    }

    /// Add an environment binding
    #[must_use]
    pub fn with_env(mut self, binding: EnvBinding) -> Self {
        self.env.push(binding);
        self
    }

    /// Add a random secret whose env store key and container variable share a name
    #[must_use]
    pub fn with_secret(self, key: impl Into<String>, bytes: usize) -> Self {
        let key = key.into();
        self.with_env(EnvBinding::secret(key.clone(), key, bytes))
    }

    /// Add a set-valued activation key
    #[must_use]
    pub fn with_activation(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.activation.push(SetMember {
            key: key.into(),
            token: token.into(),
        });
        self
    }

    /// Label, defaults to the service name
    #[must_use]
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Container name, defaults to the service name
    #[must_use]
    pub fn container_name(&self) -> &str {
        self.container_name.as_deref().unwrap_or(&self.name)
    }

    /// Upper-case env prefix derived from the name (`vault-n8n` → `VAULT_N8N`)
    #[must_use]
    pub fn env_prefix(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }

    /// Env key receiving the derived host name
    #[must_use]
    pub fn hostname_key(&self) -> String {
        self.hostname_key
            .clone()
            .unwrap_or_else(|| format!("{}_HOSTNAME", self.env_prefix()))
    }

    /// Route address token
    #[must_use]
    pub fn host_token(&self) -> String {
        self.host_token
            .clone()
            .unwrap_or_else(|| format!("{{${}}}", self.hostname_key()))
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// `IntegrationError::InvalidSpec` describing the first problem found
    pub fn validate(&self) -> IntegrationResult<()> {
        let invalid = |msg: String| Err(IntegrationError::InvalidSpec(msg));

        if !is_identifier(&self.name) {
            return invalid(format!("service name '{}' must be [A-Za-z0-9_.-]+", self.name));
        }
        if self.image.trim().is_empty() || self.image.contains(char::is_whitespace) {
            return invalid(format!("image '{}' is not a valid reference", self.image));
        }
        if self.port == 0 {
            return invalid("port must be non-zero".to_string());
        }
        if !is_identifier(&self.volume.name) {
            return invalid(format!("volume name '{}' must be [A-Za-z0-9_.-]+", self.volume.name));
        }
        if !self.volume.mount.starts_with('/') {
            return invalid(format!("volume mount '{}' must be absolute", self.volume.mount));
        }
        if !is_env_key(&self.base_domain_key) {
            return invalid(format!("base domain key '{}' is not a valid env key", self.base_domain_key));
        }
        let hostname_key = self.hostname_key();
        if !is_env_key(&hostname_key) {
            return invalid(format!("hostname key '{hostname_key}' is not a valid env key"));
        }
        let token = self.host_token();
        if token.is_empty() || token.contains(char::is_whitespace) || token.contains(',') {
            return invalid(format!("host token '{token}' must be a single address"));
        }

        let mut vars = HashSet::new();
        let mut keys = HashSet::from([hostname_key.as_str()]);
        for binding in &self.env {
            if !is_env_key(&binding.var) {
                return invalid(format!("env var '{}' is not a valid name", binding.var));
            }
            if !vars.insert(binding.var.as_str()) {
                return invalid(format!("env var '{}' bound twice", binding.var));
            }
            match &binding.source {
                ValueSource::Secret { key, bytes, .. } => {
                    if !is_env_key(key) {
                        return invalid(format!("env key '{key}' is not a valid name"));
                    }
                    if *bytes == 0 {
                        return invalid(format!("secret '{key}' needs a positive byte length"));
                    }
                    if !keys.insert(key.as_str()) {
                        return invalid(format!("env key '{key}' used twice"));
                    }
                }
                ValueSource::Literal { value } if value.contains(['\n', '\r']) => {
                    return invalid(format!("literal for '{}' spans multiple lines", binding.var));
                }
                ValueSource::Literal { .. } | ValueSource::Hostname => {}
            }
        }

        for member in &self.activation {
            if !is_env_key(&member.key) {
                return invalid(format!("activation key '{}' is not a valid name", member.key));
            }
            if member.token.is_empty()
                || member.token.contains([',', '"', '\''])
                || member.token.contains(char::is_whitespace)
            {
                return invalid(format!("activation token '{}' is not a plain list token", member.token));
            }
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_env_key(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Locations of the three stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Flat env store
    pub env: PathBuf,
    /// Service topology document
    pub topology: PathBuf,
    /// Routing document
    pub routes: PathBuf,
}

impl StorePaths {
    /// Conventional file names inside `dir`
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            env: dir.join(".env"),
            topology: dir.join("docker-compose.yml"),
            routes: dir.join("Caddyfile"),
        }
    }
}

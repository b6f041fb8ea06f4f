//! Testing utilities for the graft workspace
//!
//! Sample deployments written to temporary directories, deterministic
//! secret generators, and file snapshots for byte-level comparisons.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use graft_core::StorePaths;
use graft_store::{SecretGenerator, StoreError, StoreResult};
use tempfile::TempDir;

pub const SAMPLE_ENV: &str = "\
# Deployment settings
USER_DOMAIN_NAME=example.com
COMPOSE_PROFILES=\"n8n,caddy\"
NO_PROXY=localhost,127.0.0.1
";

pub const SAMPLE_COMPOSE: &str = "\
version: \"3.8\"

volumes:
  n8n_storage:
  caddy_data:

services:
  n8n:
    image: n8nio/n8n:latest
    profiles: [\"n8n\"]
    environment:
      - N8N_HOST=${N8N_HOSTNAME}
    volumes:
      - n8n_storage:/home/node/.n8n

  caddy:
    image: caddy:2
    ports:
      - \"80:80\"
";

pub const SAMPLE_CADDYFILE: &str = "\
{
    email {$LETSENCRYPT_EMAIL}
}

# N8N
{$N8N_HOSTNAME} {
    reverse_proxy n8n:5678
}
";

/// A sample deployment inside a temporary directory
///
/// The directory is removed when this value is dropped.
pub struct Project {
    pub dir: TempDir,
    pub paths: StorePaths,
}

impl Project {
    /// Deployment with all three sample files
    pub fn sample() -> Self {
        Self::with_files(Some(SAMPLE_ENV), Some(SAMPLE_COMPOSE), Some(SAMPLE_CADDYFILE))
    }

    /// Deployment with only the files given; `None` leaves a file absent
    pub fn with_files(env: Option<&str>, compose: Option<&str>, caddy: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::in_dir(dir.path());
        for (path, text) in [(&paths.env, env), (&paths.topology, compose), (&paths.routes, caddy)] {
            if let Some(text) = text {
                fs::write(path, text).unwrap();
            }
        }
        Self { dir, paths }
    }

    pub fn env(&self) -> String {
        read(&self.paths.env)
    }

    pub fn compose(&self) -> String {
        read(&self.paths.topology)
    }

    pub fn caddyfile(&self) -> String {
        read(&self.paths.routes)
    }

    /// Contents of the three stores, `None` where a file is absent
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            env: fs::read_to_string(&self.paths.env).ok(),
            compose: fs::read_to_string(&self.paths.topology).ok(),
            caddy: fs::read_to_string(&self.paths.routes).ok(),
        }
    }

    /// Names of every entry in the project directory
    pub fn entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub env: Option<String>,
    pub compose: Option<String>,
    pub caddy: Option<String>,
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

/// Value of `key` in env text, without quote handling
pub fn env_value(text: &str, key: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.strip_prefix(key)?.strip_prefix('='))
        .map(str::to_string)
}

/// Counts calls and returns `0123…` style tokens
#[derive(Debug, Default)]
pub struct CountingGenerator {
    calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SecretGenerator for CountingGenerator {
    fn generate(&self, byte_len: usize) -> StoreResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let digit = char::from_digit((n % 16) as u32, 16).unwrap_or('0');
        Ok(std::iter::repeat(digit).take(byte_len * 2).collect())
    }
}

/// Always fails as if the OS random source were unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingGenerator;

impl SecretGenerator for FailingGenerator {
    fn generate(&self, _byte_len: usize) -> StoreResult<String> {
        Err(StoreError::EntropyUnavailable("random source closed".into()))
    }
}

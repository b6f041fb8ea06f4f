//! Flat `KEY=value` environment store
//!
//! Lines are kept verbatim. Lookups match the literal left-hand side of an
//! assignment; comments and blank lines are carried through untouched. New
//! keys are appended at the end, existing scalar values are never rewritten,
//! and set-valued keys only ever grow.

use std::path::{Path, PathBuf};

use crate::atomic::{read_existing, write_atomic};
use crate::error::{StoreError, StoreResult};

/// What to do when the store file does not exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail with `NotFound`
    MustExist,
    /// Start from an empty store; the file is created on save
    CreateIfMissing,
}

/// Outcome of [`KeyValueStore::ensure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ensured {
    /// Key was already defined; value returned unchanged
    Existing(String),
    /// Key was absent and has been appended with this value
    Created(String),
}

impl Ensured {
    /// The effective value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Existing(v) | Self::Created(v) => v,
        }
    }

    /// Whether the value was newly created
    #[inline]
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// Consume into the effective value
    #[inline]
    #[must_use]
    pub fn into_value(self) -> String {
        match self {
            Self::Existing(v) | Self::Created(v) => v,
        }
    }
}

/// Environment store backed by a `.env` file
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    path: PathBuf,
    lines: Vec<String>,
    newline: &'static str,
    trailing_newline: bool,
    pending_section: Option<String>,
    dirty: bool,
}

/// Pieces of a raw value: `<lead><quote><inner><quote><tail>`
struct ValueParts<'a> {
    lead: &'a str,
    quote: Option<char>,
    inner: &'a str,
    tail: &'a str,
}

impl KeyValueStore {
    /// Load store from `path`
    ///
    /// # Errors
    /// - `StoreError::NotFound` if the file is missing and `mode` is `MustExist`
    /// - `StoreError::Io` if the file exists but cannot be read
    pub fn load(path: impl AsRef<Path>, mode: OpenMode) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = match read_existing(path) {
            Ok(text) => text,
            Err(StoreError::NotFound { .. }) if mode == OpenMode::CreateIfMissing => {
                tracing::debug!(path = %path.display(), "env store missing, starting empty");
                String::new()
            }
            Err(e) => return Err(e),
        };
        Ok(Self::parse(path, &text))
    }

    /// Build store from in-memory text
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Self {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = text.ends_with('\n');
        let body = text.strip_suffix('\n').unwrap_or(text);
        let lines = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
                .collect()
        };

        Self {
            path: path.into(),
            lines,
            newline,
            trailing_newline,
            pending_section: None,
            dirty: false,
        }
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are unsaved changes
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Keys in file order (first definition of each)
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|l| split_entry(l).map(|(k, _)| k))
    }

    /// Whether `key` is defined
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    /// Value of `key` with one layer of surrounding quotes removed
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let idx = self.find(key)?;
        let (_, raw) = split_entry(&self.lines[idx])?;
        match split_value(raw) {
            Ok(parts) => Some(parts.inner.to_string()),
            Err(_) => Some(raw.trim().to_string()),
        }
    }

    /// 1-based line number of the first definition of `key`
    #[must_use]
    pub fn line_of(&self, key: &str) -> Option<usize> {
        self.find(key).map(|i| i + 1)
    }

    /// Whether `token` is a member of the list stored under `key`
    ///
    /// # Errors
    /// `StoreError::MalformedEntry` if the existing list cannot be parsed
    pub fn has_set_member(&self, key: &str, token: &str) -> StoreResult<bool> {
        let Some(idx) = self.find(key) else {
            return Ok(false);
        };
        let (_, raw) = split_entry(&self.lines[idx])
            .ok_or_else(|| StoreError::malformed(&self.path, idx + 1, key, "not an assignment"))?;
        let parts = split_value(raw)
            .map_err(|message| StoreError::malformed(&self.path, idx + 1, key, message))?;
        let members = parse_members(parts.inner)
            .map_err(|message| StoreError::malformed(&self.path, idx + 1, key, message))?;
        Ok(members.contains(&token))
    }

    /// Return the existing value of `key`, or append one produced by `factory`
    ///
    /// The factory runs only when the key is absent.
    ///
    /// # Errors
    /// - Whatever `factory` returns; nothing is appended in that case
    /// - `StoreError::MalformedEntry` if the key or value cannot be written
    ///   as a single line
    pub fn ensure<F>(&mut self, key: &str, factory: F) -> StoreResult<Ensured>
    where
        F: FnOnce() -> StoreResult<String>,
    {
        if let Some(existing) = self.get(key) {
            tracing::debug!(key, "env key already present");
            return Ok(Ensured::Existing(existing));
        }

        let value = factory()?;
        self.append_entry(key, &value)?;
        tracing::info!(key, path = %self.path.display(), "appended env key");
        Ok(Ensured::Created(value))
    }

    /// Make `token` a member of the comma-separated list stored under `key`
    ///
    /// Returns `true` if the store changed.
    ///
    /// # Errors
    /// `StoreError::MalformedEntry` if the token is not a plain list member or
    /// the existing list cannot be parsed (unbalanced quote, empty token)
    pub fn ensure_set_member(&mut self, key: &str, token: &str) -> StoreResult<bool> {
        if let Err(message) = validate_token(token) {
            let line = self.find(key).map_or(self.lines.len() + 1, |i| i + 1);
            return Err(StoreError::malformed(&self.path, line, key, message));
        }

        let Some(idx) = self.find(key) else {
            self.append_entry(key, token)?;
            tracing::info!(key, token, "created set-valued env key");
            return Ok(true);
        };

        let line = &self.lines[idx];
        let (_, raw) = split_entry(line).ok_or_else(|| {
            StoreError::malformed(&self.path, idx + 1, key, "not an assignment")
        })?;
        let parts = split_value(raw)
            .map_err(|message| StoreError::malformed(&self.path, idx + 1, key, message))?;
        let members = parse_members(parts.inner)
            .map_err(|message| StoreError::malformed(&self.path, idx + 1, key, message))?;

        if members.contains(&token) {
            tracing::debug!(key, token, "set member already present");
            return Ok(false);
        }

        let inner = parts.inner.trim_end();
        let joined = if members.is_empty() {
            token.to_string()
        } else {
            format!("{inner},{token}")
        };
        let quote = parts.quote.map(String::from).unwrap_or_default();
        let gap = if parts.tail.starts_with('#') { " " } else { "" };
        let eq = line.find('=').unwrap_or(line.len());
        let rebuilt = format!(
            "{}={}{quote}{joined}{quote}{gap}{}",
            &line[..eq],
            parts.lead,
            parts.tail
        );

        self.lines[idx] = rebuilt;
        self.dirty = true;
        tracing::info!(key, token, "extended set-valued env key");
        Ok(true)
    }

    /// Label the next appended line with a `# label` header
    ///
    /// The header is only written if something is appended afterwards.
    pub fn begin_section(&mut self, label: impl Into<String>) {
        self.pending_section = Some(label.into());
    }

    /// Render the store as file text
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = self.lines.join(self.newline);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.newline);
        }
        out
    }

    /// Write changes back atomically; a clean store is not rewritten
    ///
    /// # Errors
    /// `StoreError::Io` on write or rename failure
    pub fn save(&mut self) -> StoreResult<()> {
        if !self.dirty {
            tracing::debug!(path = %self.path.display(), "env store unchanged, skipping write");
            return Ok(());
        }
        write_atomic(&self.path, &self.to_text())?;
        self.dirty = false;
        Ok(())
    }

    fn find(&self, key: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| split_entry(l).is_some_and(|(k, _)| k == key))
    }

    fn append_entry(&mut self, key: &str, value: &str) -> StoreResult<()> {
        let line_no = self.lines.len() + 1;
        if key.is_empty() || key.contains('=') || key.contains(char::is_whitespace) {
            return Err(StoreError::malformed(&self.path, line_no, key, "invalid key name"));
        }
        if value.contains(['\n', '\r']) {
            return Err(StoreError::malformed(
                &self.path,
                line_no,
                key,
                "value spans multiple lines",
            ));
        }

        if let Some(label) = self.pending_section.take() {
            if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
                self.lines.push(String::new());
            }
            self.lines.push(format!("# {label}"));
        }
        self.lines.push(format!("{key}={value}"));
        self.trailing_newline = true;
        self.dirty = true;
        Ok(())
    }
}

/// Split an assignment line into `(key, raw value)`
fn split_entry(line: &str) -> Option<(&str, &str)> {
    if line.trim_start().starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some((key, value))
}

fn split_value(raw: &str) -> Result<ValueParts<'_>, &'static str> {
    let rest = raw.trim_start();
    let lead = &raw[..raw.len() - rest.len()];

    match rest.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let body = &rest[1..];
            let close = body.find(q).ok_or("unbalanced quote")?;
            Ok(ValueParts {
                lead,
                quote: Some(q),
                inner: &body[..close],
                tail: &body[close + 1..],
            })
        }
        Some('#') => Ok(ValueParts {
            lead: "",
            quote: None,
            inner: "",
            tail: raw,
        }),
        _ => {
            let end = rest.find(" #").unwrap_or(rest.len());
            let inner = rest[..end].trim_end();
            Ok(ValueParts {
                lead,
                quote: None,
                inner,
                tail: &rest[inner.len()..],
            })
        }
    }
}

fn parse_members(inner: &str) -> Result<Vec<&str>, &'static str> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    let members: Vec<&str> = inner.split(',').map(str::trim).collect();
    if members.iter().any(|m| m.is_empty()) {
        return Err("empty token in list");
    }
    Ok(members)
}

fn validate_token(token: &str) -> Result<(), &'static str> {
    if token.is_empty() {
        return Err("empty list token");
    }
    if token.contains([',', '"', '\'']) || token.contains(char::is_whitespace) {
        return Err("list token contains a separator, quote or whitespace");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    fn store(text: &str) -> KeyValueStore {
        KeyValueStore::parse(".env", text)
    }

    #[test]
    fn has_matches_literal_key_only() {
        let s = store("# AUTH_TOKEN=commented\nAUTH_TOKEN_OLD=1\n  DOMAIN = example.com\n");
        assert!(!s.has("AUTH_TOKEN"));
        assert!(s.has("AUTH_TOKEN_OLD"));
        assert!(s.has("DOMAIN"));
    }

    #[test]
    fn get_strips_quotes_and_keeps_everything_after_first_eq() {
        let s = store("A=\"quoted value\"\nB='single'\nC=x=y=z\nD=plain # note\n");
        assert_eq!(s.get("A").as_deref(), Some("quoted value"));
        assert_eq!(s.get("B").as_deref(), Some("single"));
        assert_eq!(s.get("C").as_deref(), Some("x=y=z"));
        assert_eq!(s.get("D").as_deref(), Some("plain"));
        assert_eq!(s.get("E"), None);
    }

    #[test]
    fn comment_only_value_reads_as_empty() {
        let s = store("USER_DOMAIN_NAME= # set me\nB=#note\n");
        assert_eq!(s.get("USER_DOMAIN_NAME").as_deref(), Some(""));
        assert_eq!(s.get("B").as_deref(), Some(""));
    }

    #[test]
    fn set_member_goes_before_comment_only_value() {
        let mut s = store("COMPOSE_PROFILES= # none yet\nNO_PROXY=#none\n");
        assert!(!s.has_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert!(s.ensure_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert!(s.ensure_set_member("NO_PROXY", "vault-n8n").unwrap());
        assert_eq!(
            s.to_text(),
            "COMPOSE_PROFILES=vault-n8n # none yet\nNO_PROXY=vault-n8n #none\n"
        );
        assert_eq!(s.get("COMPOSE_PROFILES").as_deref(), Some("vault-n8n"));
        assert!(!s.ensure_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
    }

    #[test]
    fn ensure_existing_skips_factory() {
        let mut s = store("AUTH_TOKEN=abc123\n");
        let calls = Cell::new(0);
        let got = s
            .ensure("AUTH_TOKEN", || {
                calls.set(calls.get() + 1);
                Ok("new".into())
            })
            .unwrap();
        assert_eq!(got, Ensured::Existing("abc123".into()));
        assert_eq!(calls.get(), 0);
        assert!(!s.is_dirty());
    }

    #[test]
    fn ensure_appends_missing_key() {
        let mut s = store("A=1");
        let got = s.ensure("B", || Ok("2".into())).unwrap();
        assert!(got.is_created());
        assert_eq!(s.to_text(), "A=1\nB=2\n");
    }

    #[test]
    fn ensure_factory_error_appends_nothing() {
        let mut s = store("A=1\n");
        let err = s
            .ensure("B", || Err(StoreError::EntropyUnavailable("down".into())))
            .unwrap_err();
        assert!(matches!(err, StoreError::EntropyUnavailable(_)));
        assert_eq!(s.to_text(), "A=1\n");
        assert!(!s.is_dirty());
    }

    #[test]
    fn section_header_precedes_first_append_only() {
        let mut s = store("A=1\n");
        s.begin_section("Vault N8N");
        s.ensure("B", || Ok("2".into())).unwrap();
        s.ensure("C", || Ok("3".into())).unwrap();
        assert_eq!(s.to_text(), "A=1\n\n# Vault N8N\nB=2\nC=3\n");
    }

    #[test]
    fn section_header_without_extra_blank_line() {
        let mut s = store("A=1\n\n");
        s.begin_section("X");
        s.ensure("B", || Ok("2".into())).unwrap();
        assert_eq!(s.to_text(), "A=1\n\n# X\nB=2\n");

        let mut empty = store("");
        empty.begin_section("X");
        empty.ensure("B", || Ok("2".into())).unwrap();
        assert_eq!(empty.to_text(), "# X\nB=2\n");
    }

    #[test]
    fn unused_section_writes_nothing() {
        let mut s = store("A=1\n");
        s.begin_section("X");
        s.ensure("A", || Ok("2".into())).unwrap();
        assert_eq!(s.to_text(), "A=1\n");
    }

    #[test]
    fn set_member_creates_extends_and_dedups() {
        let mut s = store("COMPOSE_PROFILES=\"n8n,flowise\"\n");
        assert!(s.ensure_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert!(!s.ensure_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert!(!s.ensure_set_member("COMPOSE_PROFILES", "n8n").unwrap());
        assert!(s.ensure_set_member("NO_PROXY", "vault-n8n").unwrap());
        assert_eq!(
            s.to_text(),
            "COMPOSE_PROFILES=\"n8n,flowise,vault-n8n\"\nNO_PROXY=vault-n8n\n"
        );
    }

    #[test]
    fn set_member_is_not_substring_match() {
        let mut s = store("COMPOSE_PROFILES=vault-n8n-ui\n");
        assert!(s.ensure_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert_eq!(s.get("COMPOSE_PROFILES").as_deref(), Some("vault-n8n-ui,vault-n8n"));
    }

    #[test]
    fn set_member_into_empty_value() {
        let mut s = store("COMPOSE_PROFILES=\nNO_PROXY=\"\"\n");
        s.ensure_set_member("COMPOSE_PROFILES", "a").unwrap();
        s.ensure_set_member("NO_PROXY", "b").unwrap();
        assert_eq!(s.to_text(), "COMPOSE_PROFILES=a\nNO_PROXY=\"b\"\n");
    }

    #[test]
    fn set_member_keeps_spacing_and_inline_comment() {
        let mut s = store("NO_PROXY=localhost, n8n # bypass\n");
        s.ensure_set_member("NO_PROXY", "vault-n8n").unwrap();
        assert_eq!(s.to_text(), "NO_PROXY=localhost, n8n,vault-n8n # bypass\n");
    }

    #[test]
    fn set_member_rejects_malformed_list() {
        let mut s = store("A=1\nCOMPOSE_PROFILES=n8n,,flowise\nNO_PROXY=\"open\n");
        let err = s.ensure_set_member("COMPOSE_PROFILES", "x").unwrap_err();
        assert!(matches!(err, StoreError::MalformedEntry { line: 2, .. }));
        let err = s.ensure_set_member("NO_PROXY", "x").unwrap_err();
        assert!(matches!(err, StoreError::MalformedEntry { line: 3, .. }));
        assert!(!s.is_dirty());
    }

    #[test]
    fn set_member_rejects_bad_token() {
        let mut s = store("");
        for bad in ["", "a,b", "a b", "\"a\""] {
            assert!(matches!(
                s.ensure_set_member("K", bad),
                Err(StoreError::MalformedEntry { .. })
            ));
        }
    }

    #[test]
    fn preserves_comments_blank_lines_and_crlf() {
        let text = "# header\r\n\r\nA=1\r\n";
        let mut s = store(text);
        assert_eq!(s.to_text(), text);
        s.ensure("B", || Ok("2".into())).unwrap();
        assert_eq!(s.to_text(), "# header\r\n\r\nA=1\r\nB=2\r\n");
    }

    #[test]
    fn rejects_multiline_values() {
        let mut s = store("");
        let err = s.ensure("K", || Ok("a\nb".into())).unwrap_err();
        assert!(matches!(err, StoreError::MalformedEntry { .. }));
    }

    #[test]
    fn load_missing_file_by_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        assert!(matches!(
            KeyValueStore::load(&path, OpenMode::MustExist),
            Err(StoreError::NotFound { .. })
        ));
        let mut s = KeyValueStore::load(&path, OpenMode::CreateIfMissing).unwrap();
        assert_eq!(s.keys().count(), 0);
        s.save().unwrap();
        assert!(!path.exists(), "clean store must not create the file");
        s.ensure("A", || Ok("1".into())).unwrap();
        s.save().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1\n");
    }

    #[test]
    fn membership_probe_does_not_mutate() {
        let s = store("COMPOSE_PROFILES=\"n8n, vault-n8n\"\nBAD=a,,b\n");
        assert!(s.has_set_member("COMPOSE_PROFILES", "vault-n8n").unwrap());
        assert!(!s.has_set_member("COMPOSE_PROFILES", "vault").unwrap());
        assert!(!s.has_set_member("NO_PROXY", "vault-n8n").unwrap());
        assert!(s.has_set_member("BAD", "a").is_err());
        assert_eq!(s.line_of("BAD"), Some(2));
        assert!(!s.is_dirty());
    }

    #[test]
    fn keys_in_file_order() {
        let s = store("B=1\n# C=2\nA=3\n");
        assert_eq!(s.keys().collect::<Vec<_>>(), vec!["B", "A"]);
    }
}

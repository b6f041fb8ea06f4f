//! Routing document (`Caddyfile`)
//!
//! Only top-level site blocks are inspected. An opener is a line whose last
//! token is `{`; a closer is a line whose first token is `}`. Trailing
//! `# ...` comments are ignored. Placeholders such as
//! `{$VAULT_N8N_HOSTNAME}` are ordinary address tokens.

use std::path::{Path, PathBuf};

use crate::atomic::{read_existing, write_atomic};
use crate::error::StoreResult;

const DEFAULT_INDENT: &str = "    ";

/// Route document backed by a Caddyfile
#[derive(Debug, Clone)]
pub struct RouteDocument {
    path: PathBuf,
    text: String,
    dirty: bool,
}

impl RouteDocument {
    /// Load document from `path`
    ///
    /// # Errors
    /// - `StoreError::NotFound` if the file does not exist
    /// - `StoreError::Io` if it cannot be read
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = read_existing(path)?;
        Ok(Self::parse(path, text))
    }

    /// Build document from in-memory text
    #[must_use]
    pub fn parse(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            dirty: false,
        }
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current document text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether there are unsaved changes
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a top-level block lists `host_token` among its addresses
    #[must_use]
    pub fn has_route(&self, host_token: &str) -> bool {
        self.top_level_openers()
            .any(|addresses| addresses.split([',', ' ', '\t']).any(|a| a == host_token))
    }

    /// Append a labelled block for `host_token` at the end of the document
    pub fn append_route(&mut self, host_token: &str, directive: &str, label: &str) {
        let newline = if self.text.contains("\r\n") { "\r\n" } else { "\n" };
        let indent = self.block_indent().unwrap_or(DEFAULT_INDENT).to_string();

        let mut block = String::new();
        if !self.text.is_empty() {
            if !self.text.ends_with('\n') {
                block.push_str(newline);
            }
            let trimmed = self.text.trim_end_matches(['\r', '\n']);
            let ends_blank = self.text[trimmed.len()..].matches('\n').count() >= 2;
            if !ends_blank {
                block.push_str(newline);
            }
        }
        block.push_str(&format!("# {label}{newline}"));
        block.push_str(&format!("{host_token} {{{newline}"));
        block.push_str(&format!("{indent}{directive}{newline}"));
        block.push_str(&format!("}}{newline}"));

        self.text.push_str(&block);
        self.dirty = true;
        tracing::info!(host = host_token, path = %self.path.display(), "appended route block");
    }

    /// Write changes back atomically; a clean document is not rewritten
    ///
    /// # Errors
    /// `StoreError::Io` on write or rename failure
    pub fn save(&mut self) -> StoreResult<()> {
        if !self.dirty {
            tracing::debug!(path = %self.path.display(), "routes unchanged, skipping write");
            return Ok(());
        }
        write_atomic(&self.path, &self.text)?;
        self.dirty = false;
        Ok(())
    }

    /// Address part of every depth-0 block opener
    fn top_level_openers(&self) -> impl Iterator<Item = &str> {
        let mut depth = 0usize;
        self.text.lines().filter_map(move |line| {
            let trimmed = strip_comment(line).trim();
            if trimmed.is_empty() {
                return None;
            }
            let opens = trimmed.split_whitespace().last() == Some("{");
            let closes = trimmed.split_whitespace().next() == Some("}");
            let at_top = depth == 0;

            if closes {
                depth = depth.saturating_sub(1);
            }
            if opens {
                depth += 1;
                if at_top {
                    return Some(trimmed[..trimmed.len() - 1].trim_end());
                }
            }
            None
        })
    }

    /// Leading whitespace of the first line nested inside a block
    fn block_indent(&self) -> Option<&str> {
        let mut depth = 0usize;
        for line in self.text.lines() {
            let trimmed = strip_comment(line).trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.split_whitespace().next() == Some("}") {
                depth = depth.saturating_sub(1);
                continue;
            }
            if depth > 0 {
                let ws = &line[..line.len() - line.trim_start().len()];
                if !ws.is_empty() {
                    return Some(ws);
                }
            }
            if trimmed.split_whitespace().last() == Some("{") {
                depth += 1;
            }
        }
        None
    }
}

/// Line without a `#` comment; `#` only starts a comment at a token boundary
fn strip_comment(line: &str) -> &str {
    let mut prev_ws = true;
    for (i, c) in line.char_indices() {
        if c == '#' && prev_ws {
            return &line[..i];
        }
        prev_ws = c.is_whitespace();
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CADDYFILE: &str = "\
{
\temail {$LETSENCRYPT_EMAIL}
}

# N8N
{$N8N_HOSTNAME} {
\treverse_proxy n8n:5678
}

flowise.example.com, {$FLOWISE_HOSTNAME} {
\treverse_proxy flowise:3001
\thandle /api {
\t\t{$NESTED_HOSTNAME} {
\t\t}
\t}
}
";

    fn doc(text: &str) -> RouteDocument {
        RouteDocument::parse("Caddyfile", text)
    }

    #[test]
    fn matches_top_level_addresses_exactly() {
        let d = doc(CADDYFILE);
        assert!(d.has_route("{$N8N_HOSTNAME}"));
        assert!(d.has_route("{$FLOWISE_HOSTNAME}"));
        assert!(d.has_route("flowise.example.com"));
        assert!(!d.has_route("{$N8N}"));
        assert!(!d.has_route("n8n:5678"));
        assert!(!d.has_route("/api"));
        assert!(!d.has_route("{$NESTED_HOSTNAME}"));
        assert!(!d.has_route("{$LETSENCRYPT_EMAIL}"));
    }

    #[test]
    fn opener_with_trailing_comment_is_recognised() {
        let mut d = doc("{$VAULT_N8N_HOSTNAME} { # vault\n  reverse_proxy vault-n8n:8000\n}\n\nother.example.com {\n  respond ok\n}\n");
        assert!(d.has_route("{$VAULT_N8N_HOSTNAME}"));
        assert!(d.has_route("other.example.com"));
        assert!(!d.has_route("#"));

        d.append_route("{$NEW_HOSTNAME}", "reverse_proxy new:80", "New");
        assert!(d.text().ends_with("# New\n{$NEW_HOSTNAME} {\n  reverse_proxy new:80\n}\n"));
    }

    #[test]
    fn strip_comment_respects_token_boundaries() {
        assert_eq!(strip_comment("a { # note"), "a { ");
        assert_eq!(strip_comment("path/#frag {"), "path/#frag {");
        assert_eq!(strip_comment("# whole line"), "");
    }

    #[test]
    fn commented_opener_does_not_count() {
        let d = doc("# {$VAULT_N8N_HOSTNAME} {\n");
        assert!(!d.has_route("{$VAULT_N8N_HOSTNAME}"));
    }

    #[test]
    fn append_uses_document_indent() {
        let mut d = doc(CADDYFILE);
        d.append_route("{$VAULT_N8N_HOSTNAME}", "reverse_proxy vault-n8n:8000", "Vault N8N");
        let expected = format!(
            "{CADDYFILE}\n# Vault N8N\n{{$VAULT_N8N_HOSTNAME}} {{\n\treverse_proxy vault-n8n:8000\n}}\n"
        );
        assert_eq!(d.text(), expected);
        assert!(d.has_route("{$VAULT_N8N_HOSTNAME}"));
        assert!(d.is_dirty());
    }

    #[test]
    fn append_to_empty_and_unterminated_documents() {
        let mut empty = doc("");
        empty.append_route("a.example.com", "respond 200", "A");
        assert_eq!(empty.text(), "# A\na.example.com {\n    respond 200\n}\n");

        let mut open = doc("b {\n  respond 204\n}");
        open.append_route("a", "respond 200", "A");
        assert_eq!(open.text(), "b {\n  respond 204\n}\n\n# A\na {\n  respond 200\n}\n");
    }

    #[test]
    fn append_does_not_stack_blank_lines() {
        let mut d = doc("b {\n    respond 204\n}\n\n");
        d.append_route("a", "respond 200", "A");
        assert_eq!(d.text(), "b {\n    respond 204\n}\n\n# A\na {\n    respond 200\n}\n");
    }
}

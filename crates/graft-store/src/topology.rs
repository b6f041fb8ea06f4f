//! Service topology document (`docker-compose.yml`)
//!
//! The document is treated as semi-structured text. A section is the run of
//! lines from a column-0 `name:` header up to the next column-0 key; its
//! children are the keys at the indentation of the first child line. Blocks
//! are inserted directly under the header, and nothing outside the inserted
//! text is re-serialised.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::atomic::{read_existing, write_atomic};
use crate::error::{StoreError, StoreResult};

static CHILD_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:"([^"]*)"|'([^']*)'|([^\s#'"][^:]*?))\s*:(?:\s|$)"#)
        .expect("child key pattern is valid")
});

static CONTAINER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s+container_name:\s*(?:"([^"]*)"|'([^']*)'|([^\s#"']+))\s*(?:#.*)?$"#)
        .expect("container_name pattern is valid")
});

const DEFAULT_INDENT: &str = "  ";
const TEMPLATE_UNIT: usize = 2;

/// One physical line with its byte range in the document
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    /// Offset of the first byte after the line terminator
    end: usize,
    /// Line text without `\n` / `\r\n`
    content: &'a str,
}

/// Lines belonging to a top-level section
#[derive(Debug)]
struct SectionSpan {
    header: usize,
    body_end: usize,
}

/// Topology document backed by a compose file
#[derive(Debug, Clone)]
pub struct TopologyDocument {
    path: PathBuf,
    text: String,
    dirty: bool,
}

impl TopologyDocument {
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

    /// Whether a column-0 `section:` header exists
    #[must_use]
    pub fn has_section(&self, section: &str) -> bool {
        self.section_span(&self.lines(), section).is_some()
    }

    /// Whether `section` already holds a block identified by `identity`
    ///
    /// A block matches when a direct child key equals `identity` or, under
    /// `services`, a `container_name:` field equals it. Matching is on whole
    /// tokens only.
    #[must_use]
    pub fn has_named_block(&self, section: &str, identity: &str) -> bool {
        let lines = self.lines();
        let Some(span) = self.section_span(&lines, section) else {
            return false;
        };
        let body = &lines[span.header + 1..span.body_end];
        let child_indent = child_indent(body);

        body.iter().any(|line| {
            let content = line.content;
            if let Some(indent) = child_indent {
                if leading_ws(content) == indent && child_key(&content[indent.len()..]) == Some(identity) {
                    return true;
                }
            }
            section == "services" && container_name(content) == Some(identity)
        })
    }

    /// Insert `rendered` directly under the `section:` header
    ///
    /// `rendered` is written at column 0 with a two-space nesting unit; it is
    /// re-based onto the indentation of the section's existing children.
    ///
    /// # Errors
    /// `StoreError::SectionNotFound` if the header does not exist; the
    /// document is left unchanged
    pub fn insert_block(&mut self, section: &str, rendered: &str) -> StoreResult<()> {
        let lines = self.lines();
        let span = self
            .section_span(&lines, section)
            .ok_or_else(|| StoreError::section_not_found(&self.path, section))?;

        let indent = child_indent(&lines[span.header + 1..span.body_end])
            .unwrap_or(DEFAULT_INDENT)
            .to_string();
        let newline = if self.text.contains("\r\n") { "\r\n" } else { "\n" };
        let header_end = lines[span.header].end;
        let header_terminated = self.text[..header_end].ends_with('\n');

        let mut block = String::new();
        if !header_terminated {
            block.push_str(newline);
        }
        for line in rendered.lines() {
            block.push_str(&rebase(line, &indent));
            block.push_str(newline);
        }

        self.text.insert_str(header_end, &block);
        self.dirty = true;
        tracing::info!(section, path = %self.path.display(), "inserted topology block");
        Ok(())
    }

    /// Write changes back atomically; a clean document is not rewritten
    ///
    /// # Errors
    /// `StoreError::Io` on write or rename failure
    pub fn save(&mut self) -> StoreResult<()> {
        if !self.dirty {
            tracing::debug!(path = %self.path.display(), "topology unchanged, skipping write");
            return Ok(());
        }
        write_atomic(&self.path, &self.text)?;
        self.dirty = false;
        Ok(())
    }

    fn lines(&self) -> Vec<Line<'_>> {
        let mut offset = 0;
        self.text
            .split_inclusive('\n')
            .map(|raw| {
                offset += raw.len();
                let content = raw.strip_suffix('\n').unwrap_or(raw);
                Line {
                    end: offset,
                    content: content.strip_suffix('\r').unwrap_or(content),
                }
            })
            .collect()
    }

    fn section_span(&self, lines: &[Line<'_>], section: &str) -> Option<SectionSpan> {
        let header = lines.iter().position(|l| is_header(l.content, section))?;
        let body_end = lines[header + 1..]
            .iter()
            .position(|l| starts_top_level(l.content))
            .map_or(lines.len(), |i| header + 1 + i);
        Some(SectionSpan { header, body_end })
    }
}

/// `section:` at column 0, optionally followed by a comment
fn is_header(content: &str, section: &str) -> bool {
    content
        .strip_prefix(section)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|rest| {
            let rest = rest.trim_start();
            rest.is_empty() || rest.starts_with('#')
        })
}

/// Non-blank, non-comment line at column 0
fn starts_top_level(content: &str) -> bool {
    !content.is_empty()
        && !content.starts_with(char::is_whitespace)
        && !content.starts_with('#')
}

fn leading_ws(content: &str) -> &str {
    &content[..content.len() - content.trim_start().len()]
}

/// Indentation of the first real child line of a section body
fn child_indent<'a>(body: &[Line<'a>]) -> Option<&'a str> {
    body.iter()
        .map(|l| l.content)
        .find(|c| {
            let t = c.trim_start();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(leading_ws)
        .filter(|ws| !ws.is_empty())
}

fn child_key(content: &str) -> Option<&str> {
    let caps = CHILD_KEY.captures(content)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim_end())
}

fn container_name(content: &str) -> Option<&str> {
    let caps = CONTAINER_NAME.captures(content)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

/// Move a template line from the two-space unit onto `indent` per level,
/// nested one level below the section header
fn rebase(line: &str, indent: &str) -> String {
    let body = line.trim_start_matches(' ');
    if body.trim().is_empty() {
        return String::new();
    }
    let level = (line.len() - body.len()) / TEMPLATE_UNIT;
    format!("{}{}", indent.repeat(level + 1), body)
}

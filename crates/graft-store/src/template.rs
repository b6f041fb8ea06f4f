//! Block templates
//!
//! Templates use `{{name}}` placeholders and are rendered in a single pass:
//! substituted text is never scanned again. Deferred references such as
//! `${VAULT_N8N_AUTH_TOKEN}` or `{$VAULT_N8N_HOSTNAME}` pass through verbatim;
//! they are resolved by the consumer of the document, never here.
//!
//! Templates are written at column 0 with a two-space nesting unit. The
//! topology adapter re-bases them onto the target section's own convention.

use std::collections::BTreeMap;

/// Errors while rendering a template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Placeholder without a matching parameter
    #[error("no value for placeholder '{{{{{0}}}}}'")]
    UnknownPlaceholder(String),

    /// `{{` without a closing `}}`
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Built-in block templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// Entry under `services:`
    Service,
    /// Entry under `volumes:`
    Volume,
    /// Directive inside a route block
    RouteDirective,
}

const SERVICE_TEMPLATE: &str = "\
{{name}}:
  image: {{image}}
  container_name: {{container_name}}
  profiles: [\"{{profile}}\"]
  restart: unless-stopped
  expose:
    - \"{{port}}\"
{{environment}}
  volumes:
    - {{volume}}:{{mount}}
";

const VOLUME_TEMPLATE: &str = "{{volume}}:\n";

const ROUTE_DIRECTIVE_TEMPLATE: &str = "reverse_proxy {{upstream}}:{{port}}";

impl TemplateKind {
    /// Template source text
    #[must_use]
    pub fn source(self) -> &'static str {
        match self {
            Self::Service => SERVICE_TEMPLATE,
            Self::Volume => VOLUME_TEMPLATE,
            Self::RouteDirective => ROUTE_DIRECTIVE_TEMPLATE,
        }
    }
}

/// Named template parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<String, String>,
}

impl Params {
    /// Empty parameter set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Look up a parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render a built-in template
///
/// # Errors
/// `TemplateError` if a placeholder has no parameter
pub fn render(kind: TemplateKind, params: &Params) -> Result<String, TemplateError> {
    render_str(kind.source(), params)
}

/// Render arbitrary template text
///
/// # Errors
/// `TemplateError` on unknown or unterminated placeholders
pub fn render_str(template: &str, params: &Params) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or(TemplateError::Unterminated(offset + open))?;
        let name = after[..close].trim();
        let value = params
            .get(name)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(value);

        let consumed = open + 2 + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_volume_block() {
        let params = Params::new().with("volume", "vault_n8n_data");
        assert_eq!(render(TemplateKind::Volume, &params).unwrap(), "vault_n8n_data:\n");
    }

    #[test]
    fn deferred_references_pass_through() {
        let params = Params::new()
            .with("upstream", "${UPSTREAM}")
            .with("port", "{$PORT}");
        assert_eq!(
            render(TemplateKind::RouteDirective, &params).unwrap(),
            "reverse_proxy ${UPSTREAM}:{$PORT}"
        );
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let params = Params::new().with("a", "{{b}}").with("b", "nope");
        assert_eq!(render_str("x={{a}}", &params).unwrap(), "x={{b}}");
    }

    #[test]
    fn unknown_placeholder_is_error() {
        let err = render_str("{{ missing }}", &Params::new()).unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("missing".into()));
        assert_eq!(err.to_string(), "no value for placeholder '{{missing}}'");
    }

    #[test]
    fn unterminated_placeholder_is_error() {
        let params = Params::new().with("a", "1");
        assert_eq!(
            render_str("{{a}} {{b", &params).unwrap_err(),
            TemplateError::Unterminated(6)
        );
    }

    #[test]
    fn service_template_mentions_every_field() {
        let src = TemplateKind::Service.source();
        for field in ["image:", "container_name:", "{{environment}}", "volumes:"] {
            assert!(src.contains(field), "missing {field}");
        }
    }
}

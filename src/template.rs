// Status line templates
// `{name}` placeholders bound to normalized metadata keys, `{{` / `}}` for literal braces

use crate::metadata::Metadata;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors raised while parsing a template string
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),

    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    #[error("placeholder '{0}' contains a colon; use a dash instead")]
    ColonInPlaceholder(String),
}

/// Errors raised while rendering a template against metadata
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("metadata has no field '{0}'")]
    MissingField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("token pattern is valid")
    })
}

/// A parsed status line template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in token_pattern().captures_iter(source) {
            let Some(token) = caps.get(0) else {
                continue;
            };
            literal.push_str(&source[last..token.start()]);
            last = token.end();

            match token.as_str() {
                "{{" => literal.push('{'),
                "}}" => literal.push('}'),
                "{" | "}" => return Err(TemplateError::UnbalancedBrace(token.start())),
                _ => {
                    let name = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(token.start()));
                    }
                    if name.contains(':') {
                        return Err(TemplateError::ColonInPlaceholder(name.to_string()));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
            }
        }

        literal.push_str(&source[last..]);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template as written in the configuration
    pub fn source(&self) -> &str {
        &self.source
    }

    fn render_with(&self, bindings: &HashMap<String, String>) -> Result<String, FormatError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = bindings
                        .get(name)
                        .ok_or_else(|| FormatError::MissingField(name.clone()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    /// Render against track metadata
    pub fn render(&self, metadata: &Metadata) -> Result<String, FormatError> {
        self.render_with(&metadata.template_bindings())
    }
}

//! Route pattern compilation and segment-wise matching.
//!
//! | Pattern              | Example match              | Bindings                     |
//! |----------------------|----------------------------|------------------------------|
//! | `/users`             | `/users`                   | *(none)*                     |
//! | `/users/{id}`        | `/users/42`                | `id → "42"`                  |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "docs/readme.txt"` |
//! | `/files/*rest`       | `/files/`                  | `rest → ""`                  |
//!
//! Matching splits on `/` and compares one segment at a time, so the cost is
//! linear in the path length. A single trailing slash is ignored on both the
//! pattern and the request path. Literals are case-sensitive.

use std::fmt;

use thiserror::Error;

use super::Params;

/// Binding name used by a bare `*` wildcard.
pub const WILDCARD_PARAM: &str = "wildcard";

/// Reasons a pattern string is rejected at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern `{0}` must start with `/`")]
    MissingLeadingSlash(String),

    #[error("pattern `{0}` contains an empty segment")]
    EmptySegment(String),

    #[error("pattern `{0}` has more than one wildcard")]
    MultipleWildcards(String),

    #[error("pattern `{0}` has a wildcard that is not the final segment")]
    WildcardNotLast(String),

    #[error("pattern `{0}` has a parameter without a name")]
    EmptyParameterName(String),

    #[error("pattern `{pattern}` has a malformed parameter segment `{segment}`")]
    MalformedParameter { pattern: String, segment: String },

    #[error("pattern `{pattern}` binds `{name}` more than once")]
    DuplicateParameter { pattern: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

/// A compiled route pattern.
///
/// # Examples
///
/// ```
/// use ligero::router::Pattern;
///
/// let pattern = Pattern::compile("/users/{id}/posts/{post}").unwrap();
/// let params = pattern.matches("/users/7/posts/99/").unwrap();
/// assert_eq!(params.get("id"), Some("7"));
/// assert_eq!(params.get("post"), Some("99"));
/// assert!(pattern.matches("/users/7").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `pattern`.
    ///
    /// # Errors
    ///
    /// Fails with a [`PatternError`] for a missing leading `/`, an empty
    /// segment, more than one wildcard, a wildcard before the last segment,
    /// an unnamed or malformed parameter, or a parameter name used twice.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let Some(body) = pattern.strip_prefix('/') else {
            return Err(PatternError::MissingLeadingSlash(pattern.to_owned()));
        };
        let body = body.strip_suffix('/').unwrap_or(body);

        let mut segments = Vec::new();
        if !body.is_empty() {
            for raw in body.split('/') {
                segments.push(parse_segment(pattern, raw)?);
            }
        }

        let wildcards = segments
            .iter()
            .filter(|s| matches!(s, Segment::Wildcard(_)))
            .count();
        if wildcards > 1 {
            return Err(PatternError::MultipleWildcards(pattern.to_owned()));
        }
        if wildcards == 1 && !matches!(segments.last(), Some(Segment::Wildcard(_))) {
            return Err(PatternError::WildcardNotLast(pattern.to_owned()));
        }

        let mut seen: Vec<&str> = Vec::new();
        for segment in &segments {
            if let Segment::Param(name) | Segment::Wildcard(name) = segment {
                if seen.contains(&name.as_str()) {
                    return Err(PatternError::DuplicateParameter {
                        pattern: pattern.to_owned(),
                        name: name.clone(),
                    });
                }
                seen.push(name);
            }
        }

        Ok(Self {
            source: canonical_source(&segments),
            segments,
        })
    }

    /// The canonical pattern string: `{name}` parameters, no trailing slash.
    ///
    /// `/users/:id/` and `/users/{id}` share the canonical form `/users/{id}`.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// `true` if the pattern ends in a wildcard.
    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard(_)))
    }

    /// Matches `path` and returns the captured bindings, or `None`.
    ///
    /// A parameter matches exactly one non-empty segment. A wildcard matches
    /// zero or more remaining segments and binds them joined by `/`.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let body = path.strip_prefix('/').unwrap_or(path);
        let body = body.strip_suffix('/').unwrap_or(body);
        let mut remaining = (!body.is_empty()).then_some(body);
        let mut params = Params::new();

        for segment in &self.segments {
            if let Segment::Wildcard(name) = segment {
                params.insert(name.as_str(), remaining.unwrap_or(""));
                return Some(params);
            }

            let current = remaining?;
            let (head, tail) = match current.split_once('/') {
                Some((head, tail)) => (head, Some(tail)),
                None => (current, None),
            };
            remaining = tail;

            match segment {
                Segment::Literal(literal) if literal == head => {}
                Segment::Param(name) if !head.is_empty() => params.insert(name.as_str(), head),
                _ => return None,
            }
        }

        remaining.is_none().then_some(params)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn canonical_source(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut source = String::new();
    for segment in segments {
        source.push('/');
        match segment {
            Segment::Literal(literal) => source.push_str(literal),
            Segment::Param(name) => {
                source.push('{');
                source.push_str(name);
                source.push('}');
            }
            Segment::Wildcard(name) if name == WILDCARD_PARAM => source.push('*'),
            Segment::Wildcard(name) => {
                source.push('*');
                source.push_str(name);
            }
        }
    }
    source
}

fn parse_segment(pattern: &str, raw: &str) -> Result<Segment, PatternError> {
    if raw.is_empty() {
        return Err(PatternError::EmptySegment(pattern.to_owned()));
    }

    if let Some(name) = raw.strip_prefix('*') {
        let name = if name.is_empty() { WILDCARD_PARAM } else { name };
        return Ok(Segment::Wildcard(name.to_owned()));
    }

    let name = if let Some(inner) = raw.strip_prefix('{') {
        match inner.strip_suffix('}') {
            Some(name) if !name.contains(['{', '}']) => Some(name),
            _ => {
                return Err(PatternError::MalformedParameter {
                    pattern: pattern.to_owned(),
                    segment: raw.to_owned(),
                });
            }
        }
    } else {
        raw.strip_prefix(':')
    };

    match name {
        Some("") => Err(PatternError::EmptyParameterName(pattern.to_owned())),
        Some(name) => Ok(Segment::Param(name.to_owned())),
        None => Ok(Segment::Literal(raw.to_owned())),
    }
}

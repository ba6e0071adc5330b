//! # URI Templates
//!
//! Path templates made of `/`-separated segments. A segment is either a literal or a
//! placeholder, written `{name}` or `:name`. A placeholder matches exactly one non-empty
//! path segment; matching always consumes the whole path.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if let Some(name) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if !name.is_empty() && !name.contains(['{', '}']) {
                return Segment::Param(name.to_string());
            }
        }
        if let Some(name) = raw.strip_prefix(':') {
            if !name.is_empty() {
                return Segment::Param(name.to_string());
            }
        }
        Segment::Literal(raw.to_string())
    }
}

/// A parsed path template such as `/v1/projects/{projectName}/resources`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UriTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl UriTemplate {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            segments: split_path(raw).map(Segment::parse).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in order of appearance
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// A template ending in a literal segment addresses a collection
    /// (`/v1/projects/{p}/resources`); one ending in a placeholder addresses a
    /// single item (`/v1/projects/{p}/resources/{id}`).
    pub fn is_collection(&self) -> bool {
        !matches!(self.segments.last(), Some(Segment::Param(_)))
    }

    /// Match `path` against the whole template, returning the bound placeholders
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let mut params = HashMap::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// Substitute `{name}` placeholders in the raw template.
    ///
    /// Returns the name of the first placeholder without a value as the error.
    pub fn render(&self, params: &HashMap<String, String>) -> Result<String, String> {
        let mut out = String::with_capacity(self.raw.len());
        let mut rest = self.raw.as_str();

        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            let name = &rest[start + 1..start + len];
            let value = params.get(name).ok_or_else(|| name.to_string())?;
            out.push_str(&rest[..start]);
            out.push_str(value);
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);

        Ok(out)
    }

    /// Template in the `:name` syntax understood by the radix router
    pub fn to_radix_path(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }

        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Param(name) => {
                    path.push(':');
                    path.push_str(name);
                }
            }
        }
        path
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let empty = trimmed.is_empty();
    trimmed.split('/').filter(move |_| !empty)
}

/// Strip a templated server-root prefix: the path starting at the first `/` after the
/// last `}` is kept, or nothing when no such `/` exists.
///
/// `"/{org}.orch/api"` becomes `"/api"`; a root without placeholders is returned as is.
pub fn normalize_root(root: &str) -> &str {
    let Some(idx) = root.rfind('}') else {
        return root;
    };
    let tail = &root[idx + 1..];
    match tail.find('/') {
        Some(slash) => &tail[slash..],
        None => "",
    }
}

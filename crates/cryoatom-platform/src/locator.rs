//! Map artifact discovery.
//!
//! Volume outputs are named differently across job types and platform
//! versions (`map_sharp/path`, `map/path`, `map_half_A/path`, ...), so the
//! locator walks an ordered list of field matchers and returns the first row
//! with a usable path.

use cryoatom_common::{ArtifactCandidate, CryoAtomError, JobOutputs, Result};
use std::fmt;
use tracing::debug;

/// Default preference order. The final `/path` entry catches any path field.
pub const DEFAULT_PRIORITIES: &[&str] = &["map_sharp", "map/", "map_half_a", "map_half_b", "/path"];

/// A predicate over output field names.
pub trait FieldMatcher: fmt::Debug + Send + Sync {
    fn matches(&self, field_name: &str) -> bool;
}

/// Case-insensitive substring match.
#[derive(Debug, Clone)]
pub struct SubstringMatcher {
    needle: String,
}

impl SubstringMatcher {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
        }
    }
}

impl FieldMatcher for SubstringMatcher {
    fn matches(&self, field_name: &str) -> bool {
        field_name.to_lowercase().contains(&self.needle)
    }
}

/// Case-insensitive whole-name match, used for an operator-specified field.
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    name: String,
}

impl ExactMatcher {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl FieldMatcher for ExactMatcher {
    fn matches(&self, field_name: &str) -> bool {
        field_name.eq_ignore_ascii_case(&self.name)
    }
}

#[derive(Debug, Default)]
pub struct ArtifactLocator {
    matchers: Vec<Box<dyn FieldMatcher>>,
}

impl ArtifactLocator {
    /// A locator with no matchers; add them with [`ArtifactLocator::with_matcher`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Substring matchers in the given priority order.
    pub fn from_substrings<I, S>(priorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        priorities
            .into_iter()
            .fold(Self::empty(), |loc, p| loc.with_matcher(SubstringMatcher::new(p.as_ref())))
    }

    /// Only the named field is acceptable.
    pub fn explicit_field(name: &str) -> Self {
        Self::empty().with_matcher(ExactMatcher::new(name))
    }

    /// Append a matcher at the lowest priority.
    pub fn with_matcher(mut self, matcher: impl FieldMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Select one map path. With `row_index` set only that row of each field is
    /// considered.
    pub fn locate(&self, outputs: &JobOutputs, row_index: Option<usize>) -> Result<ArtifactCandidate> {
        for matcher in &self.matchers {
            for (field_name, rows) in outputs.fields().filter(|(name, _)| matcher.matches(name)) {
                let hit = rows
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| row_index.map_or(true, |wanted| *i == wanted))
                    .find_map(|(i, row)| row.usable_path().map(|p| (i, p)));

                if let Some((i, path)) = hit {
                    debug!(field = field_name, row = i, ?matcher, "Located map artifact");
                    return Ok(ArtifactCandidate {
                        field_name: field_name.to_string(),
                        row_index: i,
                        path: path.to_string(),
                    });
                }
            }
        }

        let rows = match row_index {
            Some(i) => format!("row {}", i),
            None => "any row".to_string(),
        };
        Err(CryoAtomError::ArtifactNotFound(format!(
            "no field yields a non-empty path in {} (fields: {:?})",
            rows,
            outputs.field_names()
        )))
    }
}

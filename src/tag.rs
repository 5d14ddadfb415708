//! Tag types - the traceability data model
//!
//! A tag is a typed, located marker found in a project artifact
//! (`REQ-AUTH-001` in a markdown document, `TEST-LOGIN-3` above a test, ...).
//! References are directed edges between tags, `chain` by default.

use crate::{Error, Result, ValidationError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Reference type used when the caller does not name one.
pub const DEFAULT_REFERENCE_TYPE: &str = "chain";

/// The closed set of tag categories.
///
/// Anything outside this set is rejected before it reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagCategory {
    #[serde(rename = "REQ")]
    Requirement,
    #[serde(rename = "DESIGN")]
    Design,
    #[serde(rename = "TASK")]
    Task,
    #[serde(rename = "TEST")]
    Test,
    #[serde(rename = "FEAT")]
    Feature,
    #[serde(rename = "SEC")]
    Security,
    #[serde(rename = "DEBT")]
    Debt,
    #[serde(rename = "ARCH")]
    Architecture,
    #[serde(rename = "API")]
    Api,
    #[serde(rename = "DOC")]
    Documentation,
    #[serde(rename = "BUG")]
    Bug,
    #[serde(rename = "PERF")]
    Performance,
    #[serde(rename = "REFACTOR")]
    Refactor,
    #[serde(rename = "CONFIG")]
    Config,
    #[serde(rename = "DEPLOY")]
    Deploy,
    #[serde(rename = "IMPL")]
    Implementation,
}

impl TagCategory {
    /// Canonical code, as persisted in the `category` column
    pub fn as_str(&self) -> &'static str {
        match self {
            TagCategory::Requirement => "REQ",
            TagCategory::Design => "DESIGN",
            TagCategory::Task => "TASK",
            TagCategory::Test => "TEST",
            TagCategory::Feature => "FEAT",
            TagCategory::Security => "SEC",
            TagCategory::Debt => "DEBT",
            TagCategory::Architecture => "ARCH",
            TagCategory::Api => "API",
            TagCategory::Documentation => "DOC",
            TagCategory::Bug => "BUG",
            TagCategory::Performance => "PERF",
            TagCategory::Refactor => "REFACTOR",
            TagCategory::Config => "CONFIG",
            TagCategory::Deploy => "DEPLOY",
            TagCategory::Implementation => "IMPL",
        }
    }

    /// Get all categories
    pub fn all() -> &'static [TagCategory] {
        &[
            TagCategory::Requirement,
            TagCategory::Design,
            TagCategory::Task,
            TagCategory::Test,
            TagCategory::Feature,
            TagCategory::Security,
            TagCategory::Debt,
            TagCategory::Architecture,
            TagCategory::Api,
            TagCategory::Documentation,
            TagCategory::Bug,
            TagCategory::Performance,
            TagCategory::Refactor,
            TagCategory::Config,
            TagCategory::Deploy,
            TagCategory::Implementation,
        ]
    }
}

impl FromStr for TagCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "REQ" | "REQUIREMENT" => Ok(TagCategory::Requirement),
            "DESIGN" => Ok(TagCategory::Design),
            "TASK" => Ok(TagCategory::Task),
            "TEST" => Ok(TagCategory::Test),
            "FEAT" | "FEATURE" => Ok(TagCategory::Feature),
            "SEC" | "SECURITY" => Ok(TagCategory::Security),
            "DEBT" => Ok(TagCategory::Debt),
            "ARCH" | "ARCHITECTURE" => Ok(TagCategory::Architecture),
            "API" => Ok(TagCategory::Api),
            "DOC" | "DOCUMENTATION" => Ok(TagCategory::Documentation),
            "BUG" => Ok(TagCategory::Bug),
            "PERF" | "PERFORMANCE" => Ok(TagCategory::Performance),
            "REFACTOR" => Ok(TagCategory::Refactor),
            "CONFIG" => Ok(TagCategory::Config),
            "DEPLOY" | "DEPLOYMENT" => Ok(TagCategory::Deploy),
            "IMPL" | "IMPLEMENTATION" => Ok(TagCategory::Implementation),
            _ => Err(ValidationError::InvalidCategory(s.to_string()).into()),
        }
    }
}

impl std::fmt::Display for TagCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tag {
    /// Store-assigned identity
    pub id: i64,
    pub category: TagCategory,
    /// Human-readable key, e.g. `AUTH-001`
    pub identifier: String,
    pub description: Option<String>,
    /// File the tag was found in
    pub file_path: String,
    /// 1-indexed line of the occurrence, when known
    pub line_number: Option<u32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// An insert-shaped tag record, as produced by the scanner.
///
/// The category is kept as raw text so that validation happens at the
/// store boundary, not at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTag {
    pub category: String,
    pub identifier: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line_number: Option<u32>,
}

impl NewTag {
    pub fn new(
        category: impl Into<String>,
        identifier: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            identifier: identifier.into(),
            description: None,
            file_path: file_path.into(),
            line_number: None,
        }
    }

    /// Builder: attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: attach a line number
    pub fn at_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Check business rules and resolve the category.
    ///
    /// Performs no I/O.
    pub fn validate(&self) -> Result<TagCategory> {
        let category: TagCategory = self.category.parse()?;
        if self.identifier.trim().is_empty() {
            return Err(ValidationError::EmptyIdentifier { category: category.to_string() }.into());
        }
        if self.file_path.is_empty() {
            return Err(ValidationError::MissingFilePath {
                identifier: self.identifier.clone(),
            }
            .into());
        }
        Ok(category)
    }
}

/// The mutable subset of a tag's fields. `None` leaves the column alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagUpdate {
    pub description: Option<String>,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
}

impl TagUpdate {
    /// Names of the columns callers may change
    pub const ALLOWED_FIELDS: &'static [&'static str] = &["description", "file_path", "line_number"];

    /// Build an update from loosely-typed `name=value` pairs.
    ///
    /// Names outside [`Self::ALLOWED_FIELDS`] are ignored, as is a
    /// `line_number` that does not parse.
    pub fn from_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut update = Self::default();
        for (name, value) in fields {
            match name {
                "description" => update.description = Some(value.to_string()),
                "file_path" => update.file_path = Some(value.to_string()),
                "line_number" => match value.parse() {
                    Ok(line) => update.line_number = Some(line),
                    Err(_) => tracing::debug!(value, "ignoring unparsable line_number"),
                },
                other => tracing::debug!(field = other, "ignoring non-updatable tag field"),
            }
        }
        update
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn file_path(mut self, file_path: impl Into<String>) -> Self {
        self.file_path = Some(file_path.into());
        self
    }

    pub fn line_number(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.file_path.is_none() && self.line_number.is_none()
    }
}

/// A directed edge between two tags.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reference {
    pub id: i64,
    pub source_tag_id: i64,
    pub target_tag_id: i64,
    pub reference_type: String,
    pub created_at: NaiveDateTime,
}

impl Reference {
    /// Check if this is a plain chain link
    pub fn is_chain(&self) -> bool {
        self.reference_type == DEFAULT_REFERENCE_TYPE
    }
}

/// Conjunctive filter for [`crate::TagStore::complex_search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagQuery {
    pub category: Option<TagCategory>,
    /// File path pattern; `*` matches any run of characters
    pub file_pattern: Option<String>,
    /// Inclusive line range
    pub line_range: Option<(u32, u32)>,
}

impl TagQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn category(mut self, category: TagCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    pub fn line_range(mut self, start: u32, end: u32) -> Self {
        self.line_range = Some((start, end));
        self
    }
}

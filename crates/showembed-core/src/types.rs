//! Domain types shared by the embedding provider, the row store and the
//! backfill pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

pub type RecordId = i64;

/// Separator placed between rendered text fields.
pub const FIELD_SEPARATOR: &str = ". ";

/// A stored show row that may still be missing its embedding.
///
/// Text fields are rendered in a fixed order (title, description, genres) so
/// that inputs are identical across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowRecord {
    pub id: RecordId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub listed_in: Option<String>,
}

/// A labelled text attribute of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextField<'a> {
    pub label: &'static str,
    pub value: Option<&'a str>,
}

impl TextField<'_> {
    /// Present means non-null and not blank.
    pub fn present(&self) -> Option<&str> {
        self.value.filter(|v| !v.trim().is_empty())
    }
}

impl ShowRecord {
    pub fn text_fields(&self) -> [TextField<'_>; 3] {
        [
            TextField { label: "Title", value: self.title.as_deref() },
            TextField { label: "Description", value: self.description.as_deref() },
            TextField { label: "Genres", value: self.listed_in.as_deref() },
        ]
    }

    /// Build the model input, e.g. `Title: X. Genres: Y`.
    ///
    /// Absent fields are dropped entirely; a record with no text yields `""`.
    pub fn embedding_input(&self) -> String {
        self.text_fields()
            .iter()
            .filter_map(|f| f.present().map(|v| format!("{}: {}", f.label, v)))
            .collect::<Vec<_>>()
            .join(FIELD_SEPARATOR)
    }
}

/// Keyset pagination marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cursor {
    #[default]
    Start,
    After(RecordId),
}

impl Cursor {
    pub fn last_id(&self) -> Option<RecordId> {
        match self {
            Cursor::Start => None,
            Cursor::After(id) => Some(*id),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Start => write!(f, "start"),
            Cursor::After(id) => write!(f, "after {id}"),
        }
    }
}

/// A fetched group of records together with the cursor range it covers.
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<ShowRecord>,
    pub cursor_before: Cursor,
    pub cursor_after: Cursor,
}

impl Batch {
    /// Wrap fetched records; the new cursor is the last record's id.
    pub fn new(records: Vec<ShowRecord>, cursor_before: Cursor) -> Self {
        let cursor_after = records.last().map_or(cursor_before, |r| Cursor::After(r.id));
        Self { records, cursor_before, cursor_after }
    }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn inputs(&self) -> Vec<String> {
        self.records.iter().map(ShowRecord::embedding_input).collect()
    }
}

/// Raw result of one inference call.
///
/// Runtimes either hand back one vector per input or a single row-major
/// buffer holding `N x D` values.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutput {
    PerInput(Vec<Vec<f32>>),
    Flattened(Vec<f32>),
}

/// Render a vector as the bracketed literal accepted by pgvector: `[v1,v2,...]`.
pub fn vector_literal(values: &[f32]) -> String {
    let body = values.iter().map(f32::to_string).collect::<Vec<_>>().join(",");
    format!("[{body}]")
}

//! Request bodies and their validation.
//!
//! `POST /embed-query` takes the raw JSON value so that wrong element types
//! produce the same 400 body as a missing field.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

pub const MIN_QUERY_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedQueryRequest {
    pub texts: Vec<String>,
}

impl EmbedQueryRequest {
    /// Validate `{ "texts": [...] }`: a non-empty array whose elements are all strings.
    pub fn from_value(body: &Value) -> Result<Self, ApiError> {
        let texts = match body.get("texts").and_then(Value::as_array) {
            Some(items) if !items.is_empty() => items,
            _ => return Err(ApiError::validation("Invalid input: \"texts\" must be a non-empty array.")),
        };
        let texts = texts
            .iter()
            .map(|t| t.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ApiError::validation("Invalid input: all elements in \"texts\" must be strings."))?;
        Ok(Self { texts })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextQuery {
    pub text: Option<String>,
}

impl TextQuery {
    pub fn validated(self) -> Result<String, ApiError> {
        match self.text {
            Some(text) if text.trim().chars().count() >= MIN_QUERY_CHARS => Ok(text),
            _ => Err(ApiError::validation(format!(
                "Query parameter \"text\" is required and must be at least {MIN_QUERY_CHARS} characters."
            ))),
        }
    }
}

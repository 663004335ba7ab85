//! Metadata filter types for search queries.
//!
//! A [`FilterExpr`] is a small predicate tree evaluated against a node's
//! metadata during layer-0 traversal (see [`crate::search::filter`]).
//! JSON form, one key per node:
//!
//! ```json
//! {"and": [
//!   {"eq": {"field": "category", "value": "A"}},
//!   {"range": {"field": "year", "gte": 2020}},
//!   {"in": {"field": "lang", "values": ["en", "de"]}}
//! ]}
//! ```

use crate::error::{IndexError, Result};
use crate::metadata::MetadataValue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterExpr {
    /// Field equals value (integers and floats compare numerically).
    Eq { field: String, value: MetadataValue },
    /// Inclusive numeric range; a missing bound is unbounded.
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },
    /// Field equals any of the values.
    In {
        field: String,
        values: Vec<MetadataValue>,
    },
    /// All sub-expressions hold. Empty matches everything.
    And(Vec<FilterExpr>),
}

impl FilterExpr {
    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        FilterExpr::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        FilterExpr::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    pub fn any_of<V: Into<MetadataValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        FilterExpr::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(exprs: impl IntoIterator<Item = FilterExpr>) -> Self {
        FilterExpr::And(exprs.into_iter().collect())
    }

    /// Parses the JSON form. Malformed input is `InvalidFilter`.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| IndexError::InvalidFilter(e.to_string()))
    }
}

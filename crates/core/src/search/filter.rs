//! Metadata filtering engine for search queries.
//!
//! Evaluates [`FilterExpr`] predicates against node metadata. A missing field
//! never matches. Integers and floats compare numerically; strings and
//! booleans only equal values of their own type.

use crate::filter_types::FilterExpr;
use crate::metadata::Metadata;

/// Check if a node's metadata satisfies the filter expression.
pub fn matches(filter: &FilterExpr, metadata: &Metadata) -> bool {
    match filter {
        FilterExpr::Eq { field, value } => metadata.get(field).is_some_and(|v| v.loose_eq(value)),
        FilterExpr::Range { field, gte, lte } => {
            let Some(x) = metadata.get(field).and_then(|v| v.as_f64()) else {
                return false;
            };
            gte.map_or(true, |lo| x >= lo) && lte.map_or(true, |hi| x <= hi)
        }
        FilterExpr::In { field, values } => metadata
            .get(field)
            .is_some_and(|v| values.iter().any(|candidate| v.loose_eq(candidate))),
        FilterExpr::And(exprs) => exprs.iter().all(|e| matches(e, metadata)),
    }
}

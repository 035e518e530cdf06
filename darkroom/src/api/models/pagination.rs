//! Shared pagination query parameters.
//!
//! Values are clamped during deserialization: negative `skip`/`limit` would
//! be rejected by Postgres `OFFSET`/`LIMIT`, and an unbounded `limit` would
//! let one request drag an arbitrary slice of the table.

use serde::{Deserialize, Deserializer};

const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Pagination {
    #[serde(deserialize_with = "non_negative")]
    pub skip: i64,
    #[serde(deserialize_with = "capped_limit")]
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { skip: 0, limit: 50 }
    }
}

fn non_negative<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(i64::deserialize(deserializer)?.max(0))
}

fn capped_limit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    Ok(i64::deserialize(deserializer)?.clamp(0, MAX_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn negative_values_are_clamped_to_zero() {
        let p: Pagination = serde_json::from_value(json!({"skip": -5, "limit": -1})).unwrap();
        assert_eq!(p.skip, 0);
        assert_eq!(p.limit, 0);
    }

    #[test]
    fn oversized_limit_is_capped() {
        let p: Pagination = serde_json::from_value(json!({"skip": 10, "limit": 100000})).unwrap();
        assert_eq!(p.skip, 10);
        assert_eq!(p.limit, MAX_LIMIT);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let p: Pagination = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.skip, 0);
        assert_eq!(p.limit, 50);
    }
}

//! Stored expected output: canonical JSON array of objects.

use crate::errors::DataIntegrityError;
use crate::fingerprint::sha256_hex;
use crate::model::ColumnMeta;
use crate::normalize::{type_map, NormalizedRow, Normalizer};
use serde_json::Value as Json;

fn shape_schema() -> Json {
    serde_json::json!({
        "type": "array",
        "minItems": 1,
        "items": {
            "type": "object",
            "additionalProperties": {
                "type": ["string", "number", "boolean", "null"]
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedOutput {
    rows: Vec<NormalizedRow>,
}

impl ExpectedOutput {
    pub fn from_rows(rows: Vec<NormalizedRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parses stored JSON. Legacy array-of-arrays payloads, empty arrays and
    /// nested values are integrity errors; legacy numbers and booleans inside
    /// objects are accepted and stringified.
    pub fn parse(problem: &str, raw: &str) -> Result<Self, DataIntegrityError> {
        let malformed = |reason: String| DataIntegrityError::Malformed {
            problem: problem.to_string(),
            reason,
        };

        if raw.trim().is_empty() {
            return Err(DataIntegrityError::MissingExpected {
                problem: problem.to_string(),
            });
        }
        let doc: Json =
            serde_json::from_str(raw).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

        if let Json::Array(items) = &doc {
            if items.is_empty() {
                return Err(DataIntegrityError::EmptyExpected {
                    problem: problem.to_string(),
                });
            }
            if items.iter().any(Json::is_array) {
                return Err(malformed(
                    "legacy array-of-arrays shape; regenerate the expected output".to_string(),
                ));
            }
        }

        let schema = shape_schema();
        let compiled = jsonschema::JSONSchema::compile(&schema)
            .map_err(|e| malformed(format!("shape schema: {}", e)))?;
        if let Err(errors) = compiled.validate(&doc) {
            let reasons: Vec<String> = errors
                .map(|e| format!("{} at '{}'", e, e.instance_path))
                .collect();
            return Err(malformed(reasons.join("; ")));
        }

        let rows = doc
            .as_array()
            .map(|items| items.iter().filter_map(Json::as_object).map(row_from_object).collect())
            .unwrap_or_default();
        Ok(Self { rows })
    }

    /// Expected rows re-normalized against the column types of the result
    /// being graded, so legacy `12.5` still matches a `NUMERIC(10,2)` column.
    pub fn conform_to(&self, normalizer: &Normalizer, columns: &[ColumnMeta]) -> Vec<NormalizedRow> {
        let types = type_map(columns);
        self.rows
            .iter()
            .map(|r| normalizer.renormalize(r, &types))
            .collect()
    }

    /// Compact JSON in column order. Deterministic for identical rows.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(&self.rows).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn fingerprint(&self) -> String {
        sha256_hex(&self.to_canonical_json())
    }
}

fn row_from_object(obj: &serde_json::Map<String, Json>) -> NormalizedRow {
    NormalizedRow::new(
        obj.iter()
            .map(|(k, v)| {
                let cell = match v {
                    Json::Null => None,
                    Json::String(s) => Some(s.clone()),
                    Json::Number(n) => Some(
                        crate::normalize::canonical_decimal(&n.to_string(), None)
                            .unwrap_or_else(|| n.to_string()),
                    ),
                    other => Some(other.to_string()),
                };
                (k.clone(), cell)
            })
            .collect(),
    )
}

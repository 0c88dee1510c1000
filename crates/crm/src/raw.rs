//! Decoded responses from the reporting endpoint and their normalization
//! into record mappings.
//!
//! The endpoint answers the same logical query in one of three encodings:
//!
//! | Shape    | Example                                   |
//! |----------|-------------------------------------------|
//! | Records  | `[{"ID": "1"}, {"ID": "2"}]`              |
//! | Matrix   | `[["ID", "NAME"], ["1", "Alice"]]`        |
//! | Error    | `{"error": "...", "error_description": ""}` |
//!
//! A matrix is recognised by an outer array longer than one whose first
//! element is itself an array. Data rows whose length differs from the
//! header are dropped, not padded.

use serde_json::{Map, Value};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Records,
    Matrix,
    Error,
    Other,
}

/// Raw decoded JSON, exactly as the endpoint returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse(Value);

impl RawResponse {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Null, `false`, `0`, `""`, `[]` and `{}` carry no data.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
        }
    }

    pub fn shape(&self) -> ResponseShape {
        match &self.0 {
            Value::Array(items) if items.len() > 1 && items[0].is_array() => ResponseShape::Matrix,
            Value::Array(_) => ResponseShape::Records,
            Value::Object(o) if o.contains_key("error") => ResponseShape::Error,
            _ => ResponseShape::Other,
        }
    }

    /// The in-band error code and optional description, if present.
    pub fn api_error(&self) -> Option<(String, Option<String>)> {
        let obj = self.0.as_object()?;
        let code = obj.get("error")?;
        let code = match code {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let description = obj
            .get("error_description")
            .map(|d| d.as_str().map(String::from).unwrap_or_else(|| d.to_string()));
        Some((code, description))
    }

    /// Normalize any recognised shape into one mapping per record.
    pub fn into_records(self) -> Vec<Map<String, Value>> {
        match self.shape() {
            ResponseShape::Matrix => {
                let Value::Array(items) = self.0 else {
                    return Vec::new();
                };
                matrix_to_records(items)
            }
            ResponseShape::Records => {
                let Value::Array(items) = self.0 else {
                    return Vec::new();
                };
                let total = items.len();
                let records: Vec<Map<String, Value>> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect();
                if records.len() != total {
                    debug!(
                        dropped = total - records.len(),
                        "ignored non-mapping elements in record response"
                    );
                }
                records
            }
            ResponseShape::Error | ResponseShape::Other => {
                debug!("response is not tabular; no records");
                Vec::new()
            }
        }
    }
}

impl From<Value> for RawResponse {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn header_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matrix_to_records(items: Vec<Value>) -> Vec<Map<String, Value>> {
    let mut iter = items.into_iter();
    let header: Vec<String> = match iter.next() {
        Some(Value::Array(h)) => h.iter().map(header_name).collect(),
        _ => return Vec::new(),
    };

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for row in iter {
        match row {
            Value::Array(values) if values.len() == header.len() => {
                records.push(header.iter().cloned().zip(values).collect());
            }
            _ => dropped += 1,
        }
    }

    debug!(
        records = records.len(),
        columns = header.len(),
        dropped,
        "normalized matrix response"
    );
    records
}

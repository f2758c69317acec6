use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier assigned by the store to sheets, columns, and rows.
pub type ObjectId = i64;

/// A single record of a source table.
pub type Record = Vec<SourceValue>;

/// Sheet snapshot as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sheet {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// Column header: the title is what mappings refer to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ObjectId,
    pub title: String,
}

/// A sheet row with its sparse list of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: ObjectId,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Row {
    /// Returns the cell stored under the given column, if the row has one.
    pub fn cell(&self, column_id: ObjectId) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.column_id == column_id)
    }
}

/// Stored cell content; either value may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub column_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
}

impl Cell {
    /// Text used for matching. The display value wins over the raw value
    /// because it reflects formatting and formulas evaluated by the store.
    pub fn text(&self) -> Option<String> {
        if let Some(display) = &self.display_value {
            return Some(display.clone());
        }
        self.value.as_ref().and_then(json_text)
    }
}

/// Normalises a raw JSON cell value into its matching text.
pub fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => Some(integer.to_string()),
            None => number.as_f64().map(number_text),
        },
        other => Some(other.to_string()),
    }
}

/// Formats a number without a trailing `.0` when it is integral.
pub fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Represents a typed value read from a source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SourceValue {
    /// Plain string literal.
    String(String),
    /// Floating point number literal.
    Number(f64),
    /// Boolean literal.
    Boolean(bool),
    /// Blank cell.
    Empty,
}

impl SourceValue {
    /// String form used to compare source values against sheet cell text.
    pub fn key(&self) -> String {
        match self {
            SourceValue::String(value) => value.clone(),
            SourceValue::Number(value) => number_text(*value),
            SourceValue::Boolean(value) => value.to_string(),
            SourceValue::Empty => String::new(),
        }
    }

    /// True for empty or whitespace-only keys.
    pub fn is_blank(&self) -> bool {
        self.key().trim().is_empty()
    }

    /// Converts the value into the JSON representation sent to the store.
    pub fn to_json(&self) -> Value {
        match self {
            SourceValue::String(value) => Value::String(value.clone()),
            SourceValue::Number(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SourceValue::Boolean(value) => Value::Bool(*value),
            SourceValue::Empty => Value::String(String::new()),
        }
    }
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            SourceValue::Empty
        } else {
            SourceValue::String(value.to_string())
        }
    }
}

/// A single cell write, shared by update and create payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMutation {
    pub column_id: ObjectId,
    pub value: Value,
}

impl CellMutation {
    /// Writes `value` into the given column.
    pub fn new(column_id: ObjectId, value: &SourceValue) -> Self {
        Self {
            column_id,
            value: value.to_json(),
        }
    }
}

/// Update of an existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowUpdate {
    pub id: ObjectId,
    pub cells: Vec<CellMutation>,
}

/// A row to be appended to the sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCreate {
    pub cells: Vec<CellMutation>,
}

/// The three operation batches computed for one mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payloads {
    pub updates: Vec<RowUpdate>,
    pub deletes: Vec<ObjectId>,
    pub creates: Vec<RowCreate>,
}

impl Payloads {
    /// True when there is nothing to send for the mapping.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty() && self.creates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_value_takes_precedence() {
        let cell = Cell {
            column_id: 1,
            value: Some(json!(0.5)),
            display_value: Some("50%".into()),
        };
        assert_eq!(cell.text().as_deref(), Some("50%"));
    }

    #[test]
    fn integral_numbers_match_source_keys() {
        let cell = Cell {
            column_id: 1,
            value: Some(json!(42.0)),
            display_value: None,
        };
        assert_eq!(cell.text(), Some(SourceValue::Number(42.0).key()));
        assert_eq!(SourceValue::Number(1.25).key(), "1.25");
    }

    #[test]
    fn sheet_deserializes_from_wire_shape() {
        let sheet: Sheet = serde_json::from_value(json!({
            "id": 7,
            "name": "Staff",
            "columns": [{"id": 11, "title": "Employee"}],
            "rows": [{"id": 100, "cells": [{"columnId": 11, "value": "E1", "displayValue": "E1"}]}]
        }))
        .expect("sheet parsed");
        assert_eq!(sheet.rows[0].cell(11).and_then(Cell::text).as_deref(), Some("E1"));
        assert!(sheet.rows[0].cell(12).is_none());
    }

    #[test]
    fn update_serializes_in_camel_case() {
        let update = RowUpdate {
            id: 5,
            cells: vec![CellMutation::new(9, &SourceValue::from("Alice"))],
        };
        assert_eq!(
            serde_json::to_value(&update).expect("serialized"),
            json!({"id": 5, "cells": [{"columnId": 9, "value": "Alice"}]})
        );
    }
}

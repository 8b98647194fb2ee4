//! In-memory table ↔ Polars DataFrame conversion.
//!
//! A [`Table`] is a list of named columns plus rows of [`Value`] cells. It is
//! the bridge between typed rows and the columnar files on disk: every column
//! gets a single Polars dtype inferred from its non-null cells.

use crate::row::{date_from_epoch_days, date_to_epoch_days, Value};
use polars::prelude::{AnyValue, Column, DataFrame, DataType, PolarsResult};
use std::collections::HashMap;

/// Storage kind for a column, inferred from its non-null cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int,
    Float,
    Date,
    Text,
}

impl ColumnKind {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Int(_) => Some(Self::Int),
            Value::Float(_) => Some(Self::Float),
            Value::Date(_) => Some(Self::Date),
            Value::Text(_) => Some(Self::Text),
        }
    }

    /// Widening rule: Int+Float → Float; any other disagreement → Text.
    fn unify(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int, Self::Float) | (Self::Float, Self::Int) => Self::Float,
            _ => Self::Text,
        }
    }

    /// All-null columns are stored as text.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        values
            .into_iter()
            .filter_map(Self::of)
            .reduce(Self::unify)
            .unwrap_or(Self::Text)
    }
}

/// Column names plus rectangular rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from sparse rows; the column set is the union in first-seen order,
    /// and missing cells are filled with `Null`.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Vec<(String, Value)>>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut sparse: Vec<Vec<(usize, Value)>> = Vec::new();

        for cells in rows {
            let mut row = Vec::with_capacity(cells.len());
            for (name, value) in cells {
                let idx = match index.get(&name) {
                    Some(&i) => i,
                    None => {
                        let i = columns.len();
                        index.insert(name.clone(), i);
                        columns.push(name);
                        i
                    }
                };
                row.push((idx, value));
            }
            sparse.push(row);
        }

        let width = columns.len();
        let rows = sparse
            .into_iter()
            .map(|cells| {
                let mut dense = vec![Value::Null; width];
                for (idx, value) in cells {
                    dense[idx] = value;
                }
                dense
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterate rows as named cells.
    pub fn records(&self) -> impl Iterator<Item = Vec<(String, Value)>> + '_ {
        self.rows
            .iter()
            .map(|row| self.columns.iter().cloned().zip(row.iter().cloned()).collect())
    }

    /// All cells of one column, or `None` if the column does not exist.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Convert to a Polars DataFrame, inferring one dtype per column.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for (idx, name) in self.columns.iter().enumerate() {
            let cells: Vec<&Value> = self.rows.iter().map(|row| &row[idx]).collect();
            columns.push(build_column(name, &cells)?);
        }
        DataFrame::new(columns)
    }

    /// Read every cell of a DataFrame back into a table.
    pub fn from_frame(df: &DataFrame) -> PolarsResult<Self> {
        let height = df.height();
        let mut columns = Vec::with_capacity(df.width());
        let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(df.width()); height];

        for column in df.get_columns() {
            columns.push(column.name().to_string());
            let series = column.as_materialized_series();
            for (i, row) in rows.iter_mut().enumerate() {
                row.push(value_from_any(&series.get(i)?));
            }
        }

        Ok(Self { columns, rows })
    }
}

fn build_column(name: &str, cells: &[&Value]) -> PolarsResult<Column> {
    let column = match ColumnKind::infer(cells.iter().copied()) {
        ColumnKind::Bool => {
            let values: Vec<Option<bool>> = cells.iter().map(|v| v.as_bool()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Int => {
            let values: Vec<Option<i64>> = cells.iter().map(|v| v.as_i64()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Float => {
            let values: Vec<Option<f64>> = cells.iter().map(|v| v.as_f64()).collect();
            Column::new(name.into(), values)
        }
        ColumnKind::Date => {
            let days: Vec<Option<i32>> = cells
                .iter()
                .map(|v| v.as_date().map(date_to_epoch_days))
                .collect();
            Column::new(name.into(), days).cast(&DataType::Date)?
        }
        ColumnKind::Text => {
            let values: Vec<Option<String>> = cells.iter().map(|v| v.to_text()).collect();
            Column::new(name.into(), values)
        }
    };
    Ok(column)
}

fn value_from_any(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::Text((*s).to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        AnyValue::Int32(i) => Value::Int(i64::from(*i)),
        AnyValue::Int64(i) => Value::Int(*i),
        AnyValue::UInt32(u) => Value::Int(i64::from(*u)),
        AnyValue::UInt64(u) => match i64::try_from(*u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(*u as f64),
        },
        AnyValue::Float32(f) => Value::Float(f64::from(*f)),
        AnyValue::Float64(f) => Value::Float(*f),
        AnyValue::Date(days) => date_from_epoch_days(*days)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        other => Value::Text(other.to_string()),
    }
}

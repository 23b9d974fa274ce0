//! Positional (ordered-tuple) form of the domain entities.
//!
//! A `Tuple` mirrors one relational row shape. Scalars are typed and individually
//! nullable so they can be bound to statement parameters without losing the
//! column type of a NULL. Nested entities appear as `Value::Tuple` (one foreign
//! row) or `Value::List` (owned child rows).

use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
    Timestamp(Option<DateTime<Utc>>),
    Tuple(Tuple),
    List(Vec<Tuple>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
        }
    }
}

/// An ordered, fixed-arity sequence of values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tuple(Vec<Value>);

impl From<Vec<Value>> for Tuple {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl Tuple {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Fails with `AppError::Format` unless the tuple holds exactly `arity` values.
    pub fn expect_arity(&self, entity: &str, arity: usize) -> Result<()> {
        if self.0.len() != arity {
            return Err(AppError::Format(format!(
                "{} tuple requires {} values, got {}",
                entity,
                arity,
                self.0.len()
            )));
        }
        Ok(())
    }

    /// Replaces the value at `index`.
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        let len = self.0.len();
        let slot = self.0.get_mut(index).ok_or_else(|| {
            AppError::Format(format!("tuple index {} out of bounds ({})", index, len))
        })?;
        *slot = value;
        Ok(())
    }

    fn at(&self, index: usize) -> Result<&Value> {
        self.0.get(index).ok_or_else(|| {
            AppError::Format(format!(
                "tuple index {} out of bounds ({})",
                index,
                self.0.len()
            ))
        })
    }

    fn mismatch(&self, index: usize, expected: &str) -> AppError {
        let found = self.0.get(index).map_or("nothing", Value::kind);
        AppError::Format(format!(
            "tuple position {} holds {}, expected {}",
            index, found, expected
        ))
    }

    pub fn int(&self, index: usize) -> Result<Option<i64>> {
        match self.at(index)? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch(index, "int")),
        }
    }

    pub fn float(&self, index: usize) -> Result<Option<f64>> {
        match self.at(index)? {
            Value::Float(v) => Ok(*v),
            _ => Err(self.mismatch(index, "float")),
        }
    }

    pub fn text(&self, index: usize) -> Result<Option<String>> {
        match self.at(index)? {
            Value::Text(v) => Ok(v.clone()),
            _ => Err(self.mismatch(index, "text")),
        }
    }

    pub fn date(&self, index: usize) -> Result<Option<NaiveDate>> {
        match self.at(index)? {
            Value::Date(v) => Ok(*v),
            _ => Err(self.mismatch(index, "date")),
        }
    }

    pub fn timestamp(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        match self.at(index)? {
            Value::Timestamp(v) => Ok(*v),
            _ => Err(self.mismatch(index, "timestamp")),
        }
    }

    pub fn tuple(&self, index: usize) -> Result<&Tuple> {
        match self.at(index)? {
            Value::Tuple(t) => Ok(t),
            _ => Err(self.mismatch(index, "tuple")),
        }
    }

    pub fn list(&self, index: usize) -> Result<&[Tuple]> {
        match self.at(index)? {
            Value::List(items) => Ok(items),
            _ => Err(self.mismatch(index, "list")),
        }
    }

    /// Like [`Tuple::int`] but a NULL is a format error.
    pub fn required_int(&self, index: usize, field: &str) -> Result<i64> {
        self.int(index)?
            .ok_or_else(|| AppError::Format(format!("{} must not be null", field)))
    }

    pub fn required_text(&self, index: usize, field: &str) -> Result<String> {
        self.text(index)?
            .ok_or_else(|| AppError::Format(format!("{} must not be null", field)))
    }

    pub fn required_date(&self, index: usize, field: &str) -> Result<NaiveDate> {
        self.date(index)?
            .ok_or_else(|| AppError::Format(format!("{} must not be null", field)))
    }

    pub fn required_timestamp(&self, index: usize, field: &str) -> Result<DateTime<Utc>> {
        self.timestamp(index)?
            .ok_or_else(|| AppError::Format(format!("{} must not be null", field)))
    }
}

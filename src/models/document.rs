//! Helpers for reading and writing the structured-document form (BSON).
//!
//! Numbers written by other clients may arrive as `Int32`, `Int64` or `Double`;
//! readers accept any of them as long as no precision is lost.

use crate::error::{AppError, Result};
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{self, Bson, Document};

fn wrong_type(key: &str, expected: &str, found: &Bson) -> AppError {
    AppError::Format(format!(
        "document field '{}' expected {}, found {:?}",
        key,
        expected,
        found.element_type()
    ))
}

fn missing(key: &str) -> AppError {
    AppError::Format(format!("document field '{}' is missing", key))
}

pub fn opt_f64(doc: &Document, key: &str) -> Result<Option<f64>> {
    match doc.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Double(v)) => Ok(Some(*v)),
        Some(Bson::Int32(v)) => Ok(Some(f64::from(*v))),
        Some(Bson::Int64(v)) => Ok(Some(*v as f64)),
        Some(other) => Err(wrong_type(key, "a number", other)),
    }
}

pub fn opt_i64(doc: &Document, key: &str) -> Result<Option<i64>> {
    match doc.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(v)) => Ok(Some(i64::from(*v))),
        Some(Bson::Int64(v)) => Ok(Some(*v)),
        Some(Bson::Double(v)) if v.fract() == 0.0 && v.is_finite() => Ok(Some(*v as i64)),
        Some(other) => Err(wrong_type(key, "an integer", other)),
    }
}

pub fn req_i64(doc: &Document, key: &str) -> Result<i64> {
    opt_i64(doc, key)?.ok_or_else(|| missing(key))
}

pub fn opt_str(doc: &Document, key: &str) -> Result<Option<String>> {
    match doc.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(key, "a string", other)),
    }
}

pub fn req_str(doc: &Document, key: &str) -> Result<String> {
    opt_str(doc, key)?.ok_or_else(|| missing(key))
}

pub fn opt_time(doc: &Document, key: &str) -> Result<Option<DateTime<Utc>>> {
    match doc.get(key) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::DateTime(dt)) => Utc
            .timestamp_millis_opt(dt.timestamp_millis())
            .single()
            .map(Some)
            .ok_or_else(|| AppError::Format(format!("document field '{}' is out of range", key))),
        Some(other) => Err(wrong_type(key, "a datetime", other)),
    }
}

pub fn req_time(doc: &Document, key: &str) -> Result<DateTime<Utc>> {
    opt_time(doc, key)?.ok_or_else(|| missing(key))
}

pub fn req_doc<'a>(doc: &'a Document, key: &str) -> Result<&'a Document> {
    match doc.get(key) {
        Some(Bson::Document(inner)) => Ok(inner),
        Some(other) => Err(wrong_type(key, "a sub-document", other)),
        None => Err(missing(key)),
    }
}

/// Sub-documents of an array field. An absent field reads as an empty array.
pub fn doc_array<'a>(doc: &'a Document, key: &str) -> Result<Vec<&'a Document>> {
    match doc.get(key) {
        None | Some(Bson::Null) => Ok(Vec::new()),
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| match item {
                Bson::Document(inner) => Ok(inner),
                other => Err(wrong_type(key, "an array of sub-documents", other)),
            })
            .collect(),
        Some(other) => Err(wrong_type(key, "an array", other)),
    }
}

pub fn time_bson(value: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(value.timestamp_millis()))
}

pub fn opt_time_bson(value: Option<DateTime<Utc>>) -> Bson {
    value.map_or(Bson::Null, time_bson)
}

pub fn opt_f64_bson(value: Option<f64>) -> Bson {
    value.map_or(Bson::Null, Bson::Double)
}

pub fn opt_i64_bson(value: Option<i64>) -> Bson {
    value.map_or(Bson::Null, Bson::Int64)
}

pub fn opt_str_bson(value: Option<&str>) -> Bson {
    value.map_or(Bson::Null, |s| Bson::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_numbers_accept_any_width() {
        let doc = doc! { "a": 3_i32, "b": 4_i64, "c": 2.5, "d": 6.0, "e": Bson::Null };
        assert_eq!(opt_f64(&doc, "a").unwrap(), Some(3.0));
        assert_eq!(opt_i64(&doc, "b").unwrap(), Some(4));
        assert_eq!(opt_i64(&doc, "d").unwrap(), Some(6));
        assert!(opt_i64(&doc, "c").is_err());
        assert_eq!(opt_f64(&doc, "e").unwrap(), None);
        assert_eq!(opt_f64(&doc, "missing").unwrap(), None);
        assert!(req_i64(&doc, "missing").is_err());
    }

    #[test]
    fn test_time_round_trip() {
        let t = Utc.with_ymd_and_hms(2023, 5, 1, 6, 30, 0).unwrap();
        let doc = doc! { "t": time_bson(t), "s": "x" };
        assert_eq!(req_time(&doc, "t").unwrap(), t);
        assert!(matches!(req_time(&doc, "s"), Err(AppError::Format(_))));
    }

    #[test]
    fn test_doc_array() {
        let doc = doc! { "items": [ { "status_id": "Rain" } ], "bad": [1] };
        assert_eq!(doc_array(&doc, "items").unwrap().len(), 1);
        assert!(doc_array(&doc, "none").unwrap().is_empty());
        assert!(doc_array(&doc, "bad").is_err());
    }
}

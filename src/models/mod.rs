//! Domain entities and their two serialized forms.
//!
//! Every entity converts to and from a positional [`Tuple`] (one relational row
//! shape) and a BSON document (the document-store shape). Both conversions go
//! through the same validating constructors as direct construction.

pub mod document;
pub mod openweather;
mod place;
mod tuple;
mod weather;

pub use place::*;
pub use tuple::{Tuple, Value};
pub use weather::*;

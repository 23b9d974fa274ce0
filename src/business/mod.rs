//! Use-cases built on the DAO contracts and the external collaborators.
//!
//! Everything here takes trait objects, so the same code runs against either
//! storage backend and against test doubles.

pub mod place;
pub mod weather;

//! Row structs and row↔domain mapping.
//!
//! Each submodule contains:
//! - `FromRow` + `Serialize` structs matching the database rows
//! - `into_domain` conversions that re-validate stored discriminants and
//!   assemble materialized trees
//! - column helpers used by the repositories for inserts

pub mod assignment;
pub mod flow_version;
pub mod progress;

//! Unit naming and service settings
//!
//! Transient units never come from a unit file; everything we know about
//! them is a name and a handful of service settings.

mod name;
mod service;

pub use name::{generate_unit_name, is_valid_unit_name, mangle_unit_name, NameError, UNIT_NAME_MAX};
pub use service::ServiceType;

//! Command implementations for the Osmium CLI.

pub mod adapt;
pub mod playbook;

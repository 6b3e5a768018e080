//! Common utilities used across the crate.

pub mod clock;
pub mod id_generator;
pub mod system;

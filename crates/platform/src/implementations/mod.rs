//! Concrete platform implementations

pub mod native;

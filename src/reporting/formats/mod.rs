//! Report output formats

pub mod markdown;

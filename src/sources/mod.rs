//! Concrete data sources.

pub mod glooko;

//! Pure data structures flowing through the dispatch pipeline.

pub mod order;

pub use order::*;

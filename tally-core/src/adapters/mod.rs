//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! DuckDB backs account lookup, transaction storage and category resolution.

pub mod duckdb;

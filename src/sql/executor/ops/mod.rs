//! Physical operator implementations.

pub mod aggregate;
pub mod alias;
pub mod distinct;
pub mod filter;
pub mod index_scan;
pub mod join;
pub mod limit;
pub mod project;
pub mod sort;
pub mod table_scan;

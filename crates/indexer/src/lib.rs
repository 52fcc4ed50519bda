pub mod collection;
pub mod config;
pub mod determinism;
pub mod errors;
pub mod facts;
pub mod identity;
pub mod index;
pub mod paths;
pub mod resolution;
pub mod runner;
pub mod stats;
pub mod writer;

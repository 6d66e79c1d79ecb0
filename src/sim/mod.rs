pub mod config;
pub mod core;
pub mod summary;
pub mod top;
pub mod trace;

#[cfg(test)]
mod unit_tests;

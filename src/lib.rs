//! Gator - a command-line RSS feed aggregator
//!
//! Users register, add and follow feeds, and pull feed items into a local
//! SQLite database as posts. The binary in `main.rs` is a thin shell around
//! [`commands::App`].

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod follows;

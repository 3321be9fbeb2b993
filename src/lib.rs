//! Skinfeed Library
//!
//! Marketplace price ingestion pipeline for CS2 item listings

pub mod config;
pub mod fetch;
pub mod ingest;
pub mod persistence;
pub mod sources;
pub mod types;

#[cfg(feature = "health")]
pub mod health;

//! # Chain Sync Library
//!
//! Chain-wide data synchronization for restaurant chains: change capture,
//! scheduling, execution with conflict detection and resolution, health
//! aggregation, and the operator HTTP API.

pub mod adapters;
pub mod auth;
pub mod capture;
pub mod config;
pub mod db;
pub mod detector;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod health;
pub mod models;
pub mod priority;
pub mod repositories;
pub mod resolver;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod telemetry;
pub use migration;

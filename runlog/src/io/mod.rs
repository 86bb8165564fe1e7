//! Process, filesystem, and delivery adapters for the engine.

pub mod artifact;
pub mod capture;
pub mod config;
pub mod driver;
pub mod environment;
pub mod notify;
pub mod persist;
pub mod record;
pub mod repo;

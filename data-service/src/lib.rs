//! data-service: a JSON document façade over an external document store,
//! with store-aware readiness for orchestration probes.
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

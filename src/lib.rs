//! Build-and-delivery orchestration core for a multi-tenant
//! site-publishing platform: priority build queue, bounded-concurrency
//! consumer, tiered retry/dead-letter path, seven-stage build pipeline,
//! per-site debounce aggregation and tenant freeze control.

pub mod broker;
pub mod config;
pub mod db;
pub mod debounce;
pub mod events;
pub mod freeze;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod services;

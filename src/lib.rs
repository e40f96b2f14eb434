//! Eye-scan analysis job service.
//!
//! Turns an uploaded scan into a diagnostic result: jobs are persisted and
//! deduplicated per scan, held in a priority queue, dispatched under a
//! concurrency cap, and run through a four-stage analysis pipeline whose
//! output is committed atomically.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;

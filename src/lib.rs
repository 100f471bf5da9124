// src/lib.rs

//! Accounting and tax news aggregator with push delivery.

pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod utils;

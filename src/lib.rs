// src/lib.rs

//! jobwatch library
//!
//! Watches career pages, stores listings it has not seen before and sends
//! them out in one batch per run.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

// src/lib.rs

//! pinbackup Library
//!
//! Backs up image boards: board URLs are accepted by the intake API, scraped
//! into picture messages, and downloaded into a `{user}/{board}` directory
//! tree, with a broker carrying all traffic between the processes.

pub mod broker;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;

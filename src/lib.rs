// src/lib.rs

//! Server artifact generator library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod platforms;
pub mod queue;
pub mod storage;
pub mod utils;

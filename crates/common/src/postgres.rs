mod client;
mod config;
mod scan_record_repository;

pub use client::*;
pub use config::*;
pub use scan_record_repository::*;

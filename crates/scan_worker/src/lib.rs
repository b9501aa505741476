pub mod batching;
pub mod domain;
mod scan_worker;

pub use scan_worker::*;

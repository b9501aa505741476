mod batch_sink;
mod error;
mod record_converter;
mod scan_event;

pub use batch_sink::*;
pub use error::*;
pub use scan_event::*;

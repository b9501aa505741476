mod result;
mod scan_record;

pub use result::*;
pub use scan_record::*;

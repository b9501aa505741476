mod accumulator;
mod dispatcher;

pub use accumulator::*;
pub use dispatcher::*;

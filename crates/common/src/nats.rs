mod client;
mod message;
mod subscription;
mod traits;

pub use client::*;
pub use message::*;
pub use subscription::*;
pub use traits::*;

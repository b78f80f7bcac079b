//! HTTP request handlers.

pub mod capabilities;
pub mod files;
pub mod uploads;

pub use capabilities::*;
pub use files::*;
pub use uploads::*;

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, send_in_chunks, setup_coordinator, visible_names};

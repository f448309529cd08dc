//! Per-entity query functions over the store's connection.

pub mod contribution;
pub mod creds;
pub mod pending;
pub mod promotion;
pub mod publisher;
pub mod queue;
pub mod stamp;
pub mod tokens;

//! Integration test crate for the tally ledger.
//!
//! This crate has no library code; it only contains integration tests
//! that exercise end-to-end contribution and promotion flows across
//! multiple workspace crates.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tally-integration-tests
//! ```

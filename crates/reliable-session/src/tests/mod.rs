//! Integration tests for the reliable session.
//!
//! - `harness.rs`  - Mock transport and a session on an in-memory store
//! - `dispatch.rs` - Send-or-enqueue of fresh requests
//! - `drain.rs`    - Ordered replay, re-queue policies, single drain
//! - `scenario.rs` - The "orders" walk-through
//! - `restart.rs`  - Persistence across manager restarts

mod drain;

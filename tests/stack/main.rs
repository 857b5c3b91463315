//! Stack tests over an in-memory link
//!
//! Run with: cargo test --test stack

mod common;
mod fold;
mod run_loop;
mod scenarios;

//! # basalt-tests
//!
//! Integration tests for the Basalt node.
//!
//! This crate provides:
//! - A harness for building chain states and request-manager fixtures
//! - Proptest strategies for hashes, trees, and ledger operation sequences
//! - Scenario tests for the download scheduler and relay cache
//! - Property-based tests for the ledger and ancestor algebra

pub mod generators;
pub mod harness;

#[cfg(test)]
mod sync_tests;

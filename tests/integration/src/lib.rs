//! Integration test utilities for the gateway client
//!
//! This crate provides an in-process mock gateway server and helpers for
//! driving the client against it end to end.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

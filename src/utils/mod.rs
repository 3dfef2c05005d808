//! Pure utility functions shared across the binaries.

pub mod bootstrap;

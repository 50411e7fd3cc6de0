//! Fakes and fixtures for exercising the pipeline without a chain, a
//! database, or a cache. Compiled for unit tests and, behind the
//! `test-utils` feature, for the integration suite.

pub mod fakes;
pub mod fixtures;

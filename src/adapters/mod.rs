//! Adapters for building external snapshot resources

pub mod snapshot_builder;

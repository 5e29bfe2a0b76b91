//! Storage core: metadata catalog, disk store, capability tokens and the
//! operations built on them.

pub mod catalog;
pub mod cors;
pub mod deletion;
pub mod disk;
pub mod namespace;
pub mod path_resolver;
pub mod pattern_matcher;
pub mod storage_service;
pub mod token_broker;
pub mod token_cache;

pub mod cors;
pub mod no_store;
pub mod rate_limit;

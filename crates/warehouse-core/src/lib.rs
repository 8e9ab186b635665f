pub mod clickhouse;
pub mod cohort;
pub mod config;
pub mod schema;
pub mod sql;
pub mod store;
pub mod validate;
pub mod warehouse;

pub mod calculate;
pub mod filter;
pub mod memory;
pub mod model;
pub mod pg;
pub mod store;

pub mod discovery;
pub mod errors;
pub mod pg;
pub mod table;

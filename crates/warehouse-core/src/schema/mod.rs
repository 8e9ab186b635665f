pub mod column;
pub mod field_type;
pub mod normalize;
pub mod overrides;

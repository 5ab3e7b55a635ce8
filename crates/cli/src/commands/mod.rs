pub mod plan;
pub mod status;

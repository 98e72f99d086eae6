pub mod model;
pub mod permission;

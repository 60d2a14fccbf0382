pub mod supervisor;
pub mod validate;

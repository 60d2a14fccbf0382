pub mod correlation;
pub mod servicer;

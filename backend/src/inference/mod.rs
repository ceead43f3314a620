pub mod model;
pub mod preprocess;
pub mod runner;
#[cfg(feature = "torch")]
pub mod torch;

pub mod intake;
pub mod staging;

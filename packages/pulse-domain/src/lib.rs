pub mod fusion;
pub mod suggestion;

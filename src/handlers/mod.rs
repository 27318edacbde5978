pub mod file;
pub mod share;

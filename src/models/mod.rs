pub mod file;
pub mod share;
pub mod user;

pub use file::*;
pub use share::*;
pub use user::*;

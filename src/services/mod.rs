pub mod clock;
pub mod encryption;
pub mod file;
pub mod file_store;
pub mod share;
pub mod token;
pub mod validator;

pub use clock::SystemClock;
pub use encryption::EncryptionEngine;
pub use file::FileService;
pub use file_store::FileStore;
pub use share::ShareService;
pub use validator::UploadValidator;

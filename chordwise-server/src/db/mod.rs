//! Database access layer

pub mod init;
pub mod jobs;
pub mod sessions;

pub use init::init_database_pool;
pub use jobs::JobStore;
pub use sessions::SessionDirectory;

//! Port adapters.

pub mod file_store;
pub mod git_cli;
pub mod local_fs;
pub mod memory_fs;
pub mod memory_git;
pub mod memory_store;
pub mod publisher;
pub mod snapshot_uow;

pub use file_store::FileStore;
pub use git_cli::GitCli;
pub use local_fs::LocalFileSystem;
pub use memory_fs::MemoryFileSystem;
pub use memory_git::MemoryGitService;
pub use memory_store::MemoryStore;
pub use publisher::BroadcastPublisher;
pub use snapshot_uow::SnapshotUnitOfWork;

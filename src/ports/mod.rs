//! Outbound ports.
//!
//! Use cases depend only on these traits; adapters live in [`crate::infra`]
//! and are injected as `Arc<dyn _>` by [`crate::wiring`].

pub mod events;
pub mod filesystem;
pub mod git;
pub mod repository;
pub mod unit_of_work;

pub use events::EventPublisher;
pub use filesystem::{DirEntry, FileStat, FileSystem};
pub use git::{CommitSummary, GitService};
pub use repository::{
    CheckpointRepository, Entity, EntityStore, ReportRepository, WorkExecutionRepository,
    WorkTreeRepository, WorkflowRunRepository, WorkflowSpaceRepository,
};
pub use unit_of_work::{
    run_in_unit_of_work, PreImages, Snapshotable, Transaction, UnitId, UnitOfWork,
};

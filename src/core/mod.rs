pub mod bulk;
pub mod engine;
pub mod error;
pub mod filter;
pub mod janitor;
pub mod materializer;
pub mod node;
pub mod paths;
pub mod pointer;
pub mod reconcile;
pub mod scanner;
pub mod snapshot;
pub mod stats;
pub mod task_queue;

pub use bulk::BulkDispatcher;
pub use engine::{Reconciliation, RunOutcome, SyncEngine};
pub use error::SyncError;
pub use filter::{Classification, NodeFilter};
pub use janitor::{Janitor, JanitorOptions, JanitorReport};
pub use materializer::{MaterializeOptions, Materializer};
pub use node::{FileType, RemoteNode};
pub use paths::PathMapper;
pub use pointer::PointerTokens;
pub use reconcile::{ReconcileReport, Reconciler};
pub use scanner::{TraversalContext, TreeWalker};
pub use snapshot::{SnapshotCache, SnapshotError};
pub use stats::RunStats;
pub use task_queue::{SqliteTaskQueue, TaskKind, TaskQueue, TransferStatus, TransferTask};

//! Application use cases / business logic

pub mod caption;
pub mod linker;
pub mod reconcile;
pub mod sync_loop;

pub use caption::{Caption, FORMAT_VERSION, render_caption};
pub use linker::{LinkError, LinkReport, LinkerConfig, MessagingLinker, ScanDirection};
pub use reconcile::{FeedReconciler, ReconcileConfig, ReconcileError, ReconcileReport};
pub use sync_loop::{PostingReport, SyncConfig, SyncError, SyncLoop, SyncState};

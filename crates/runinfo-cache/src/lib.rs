mod cache;
mod project;
mod registry;

pub use cache::{AnnotationCache, CacheStats, MarkSource, SqliteMarkSource};
pub use project::ProjectAnnotations;
pub use registry::{ContentRoot, StoreChange, StoreRegistry};

//! Local cache of Mercurial working copies and bare git repositories

mod hgrc;
mod lock;
mod manager;
mod paths;

pub use hgrc::BOOKMARK_SUFFIX;
pub use lock::ModuleLock;
pub use manager::{CacheError, LocalCache};
pub use paths::CachePaths;

//! Strata Core - a three-tier code index and patch engine
//!
//! This library builds a repository map (L1), per-file skeletons (L2) and
//! live line-range reads (L3) over a codebase, and applies search/replace,
//! diff and line-operation patches to it.

pub mod analyze;
pub mod coder;
pub mod config;
pub mod error;
pub mod facade;
pub mod index;
pub mod parse;
pub mod search;
pub mod symbol;

pub use analyze::{Analysis, AnalysisStats, Analyzer, CancellationToken};
pub use coder::{Coder, CoderResult, PatchFailure, PatchOperation, PatchOptions, Strategy};
pub use config::Config;
pub use error::{AnalysisIssue, RangeBound, StrataError};
pub use facade::{Strata, SymbolMatch, SymbolReferences};
pub use index::{IndexBuilder, RenderOptions, RenderedMap, RepositoryMap, Skeleton, Trajectory};
pub use search::{ContentMatch, ContentQuery, SearchBackend, SearchEngine, SearchOutcome};
pub use symbol::{CodeNode, LineRange, Location, Symbol, SymbolId, SymbolKind};

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

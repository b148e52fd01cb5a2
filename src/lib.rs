//! Incrementally synchronized structural graph of Python and TypeScript/JavaScript code,
//! with cross-file resolution, impact analysis and transactional node edits.

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod impact;
pub mod mutation;
pub mod parser;
pub mod process;
pub mod resolve;
pub mod response;
pub mod sync;

pub use config::{LensPaths, ProjectConfig};
pub use context::ProjectContext;
pub use error::{LensError, Result};
pub use graph::{
    Change, ChangeAction, ChangeHistory, Confidence, Edge, EdgeKind, GraphProjection, GraphStore,
    Node, NodeKind, SessionNotes, SyncResult,
};
pub use impact::{ImpactZone, Severity};
pub use mutation::{EditOutcome, MutationEngine, NodeUpdate};
pub use parser::{LanguageParser, ParserRegistry};
pub use response::OpResponse;
pub use sync::SyncEngine;

pub mod history;
pub mod metrics;
pub mod models;
pub mod notes;
pub mod projection;
pub mod store;

pub use history::ChangeHistory;
pub use metrics::compute_metrics;
pub use models::*;
pub use notes::{Note, SessionNotes};
pub use projection::GraphProjection;
pub use store::{GraphStats, GraphStore};

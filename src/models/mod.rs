pub mod catalog;
pub mod evaluation;
pub mod feedback;
pub mod item;
pub mod selection;

pub use catalog::Catalog;
pub use evaluation::{EvaluationRecord, RecordOrigin, Verdict};
pub use feedback::FeedbackAccumulator;
pub use item::{natural_cmp, ItemId};
pub use selection::{BestSelection, Candidate};

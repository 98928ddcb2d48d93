//! Data loading, history indexing and feature engineering modules

pub mod csv_loader;
pub mod features;
pub mod history;
pub mod output;
pub mod splitter;

// Re-export commonly used types
pub use csv_loader::{Dataset, REQUIRED_COLUMNS};
pub use features::{FeatureEngineering, FeatureSet, FeatureVector, Imputation, Imputer};
pub use history::{DriverHistoryIndex, HistoricalRaceEntry, TrackRecord};
pub use output::{predictions_frame, read_scored_rows, write_predictions};
pub use splitter::{EvalSet, RosterPolicy, SkipReason, WindowedSplitter, YearSplit};

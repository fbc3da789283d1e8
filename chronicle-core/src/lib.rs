//! CHRONICLE Core - Series Types
//!
//! Identifiers, date-indexed series, change notification and the
//! [`SeriesSource`] trait. The caching layer in `chronicle-cache` is built
//! entirely on these types.

mod change;
mod error;
mod identity;
mod series;
mod source;

pub use change::{ChangeEvent, ChangeListener, ChangeManager, ChangeType, ListenerId, Timestamp};
pub use error::{
    ChronicleError, ChronicleResult, ConfigError, SourceError, StoreError, ValidationError,
    ValidationResult,
};
pub use identity::{ExternalId, ExternalIdBundle, ObjectId, UniqueId};
pub use series::{DataPoint, DateDoubleSeries, DateWindow, HistoricalSeries};
pub use source::{SeriesBatchRequest, SeriesSelector, SeriesSource};

//! The underlying series source and the selectors used to query it.

use crate::{
    ChangeManager, ChronicleResult, DateWindow, ExternalIdBundle, HistoricalSeries, UniqueId,
    ValidationError, ValidationResult,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Identifies which series a caller wants, independent of the date range.
///
/// Equal selectors always name the same series; selectors that differ in any
/// field are distinct cache keys even when they happen to resolve to the
/// same stored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesSelector {
    /// A stored series addressed directly.
    UniqueId(UniqueId),
    /// Identifiers plus an explicit source/provider/field triple.
    Identifiers {
        identifiers: ExternalIdBundle,
        validity_date: Option<NaiveDate>,
        data_source: Option<String>,
        data_provider: Option<String>,
        data_field: String,
    },
    /// Identifiers plus a field, with source and provider chosen by a
    /// resolution rule set.
    Resolved {
        data_field: String,
        identifiers: ExternalIdBundle,
        validity_date: Option<NaiveDate>,
        resolution_key: Option<String>,
    },
}

impl SeriesSelector {
    pub fn unique_id(unique_id: UniqueId) -> Self {
        Self::UniqueId(unique_id)
    }

    /// Selector for an explicit source/provider/field triple.
    pub fn identifiers(
        identifiers: ExternalIdBundle,
        data_source: Option<String>,
        data_provider: Option<String>,
        data_field: impl Into<String>,
    ) -> ValidationResult<Self> {
        let data_field = data_field.into();
        validate_lookup(&identifiers, &data_field)?;
        Ok(Self::Identifiers {
            identifiers,
            validity_date: None,
            data_source,
            data_provider,
            data_field,
        })
    }

    /// Selector resolved through `resolution_key` (the default rules if `None`).
    pub fn resolved(
        data_field: impl Into<String>,
        identifiers: ExternalIdBundle,
        resolution_key: Option<String>,
    ) -> ValidationResult<Self> {
        let data_field = data_field.into();
        validate_lookup(&identifiers, &data_field)?;
        Ok(Self::Resolved {
            data_field,
            identifiers,
            validity_date: None,
            resolution_key,
        })
    }

    /// Pin the date on which the identifiers must be valid.
    ///
    /// Has no effect on a `UniqueId` selector.
    pub fn valid_on(mut self, date: NaiveDate) -> Self {
        match &mut self {
            Self::UniqueId(_) => {}
            Self::Identifiers { validity_date, .. } | Self::Resolved { validity_date, .. } => {
                *validity_date = Some(date);
            }
        }
        self
    }

    /// The external identifiers this selector resolves through, if any.
    pub fn external_ids(&self) -> Option<&ExternalIdBundle> {
        match self {
            Self::UniqueId(_) => None,
            Self::Identifiers { identifiers, .. } | Self::Resolved { identifiers, .. } => {
                Some(identifiers)
            }
        }
    }
}

fn validate_lookup(identifiers: &ExternalIdBundle, data_field: &str) -> ValidationResult<()> {
    if identifiers.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "identifiers".to_string(),
            reason: "bundle must contain at least one external id".to_string(),
        });
    }
    if data_field.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "data_field".to_string(),
        });
    }
    Ok(())
}

/// A multi-series request sharing one source/provider/field triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesBatchRequest {
    pub identifiers: BTreeSet<ExternalIdBundle>,
    pub data_source: Option<String>,
    pub data_provider: Option<String>,
    pub data_field: String,
}

impl SeriesBatchRequest {
    pub fn new(
        identifiers: impl IntoIterator<Item = ExternalIdBundle>,
        data_source: Option<String>,
        data_provider: Option<String>,
        data_field: impl Into<String>,
    ) -> Self {
        Self {
            identifiers: identifiers.into_iter().collect(),
            data_source,
            data_provider,
            data_field: data_field.into(),
        }
    }

    /// The same request restricted to `identifiers`.
    pub fn with_identifiers(&self, identifiers: impl IntoIterator<Item = ExternalIdBundle>) -> Self {
        Self {
            identifiers: identifiers.into_iter().collect(),
            data_source: self.data_source.clone(),
            data_provider: self.data_provider.clone(),
            data_field: self.data_field.clone(),
        }
    }

    /// The single-series selector equivalent to one member of this batch.
    pub fn selector_for(&self, identifiers: &ExternalIdBundle) -> SeriesSelector {
        SeriesSelector::Identifiers {
            identifiers: identifiers.clone(),
            validity_date: None,
            data_source: self.data_source.clone(),
            data_provider: self.data_provider.clone(),
            data_field: self.data_field.clone(),
        }
    }
}

/// The slow source of truth sitting behind the cache.
///
/// Every fetch returns `Ok(None)` when the series does not exist, and an
/// error only when the source itself failed.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    /// The whole series for `unique_id`.
    async fn series_by_id(&self, unique_id: &UniqueId) -> ChronicleResult<Option<HistoricalSeries>>;

    /// The points of the selected series inside `window`, limited to
    /// `|max_points|` points from the start (positive) or end (negative).
    async fn series(
        &self,
        selector: &SeriesSelector,
        window: &DateWindow,
        max_points: Option<i32>,
    ) -> ChronicleResult<Option<HistoricalSeries>>;

    /// One bulk fetch for many bundles. Bundles the source cannot resolve may
    /// be absent from the result or mapped to `None`.
    async fn series_batch(
        &self,
        request: &SeriesBatchRequest,
        window: &DateWindow,
    ) -> ChronicleResult<HashMap<ExternalIdBundle, Option<HistoricalSeries>>>;

    /// The external identifiers of the series stored under `unique_id`.
    async fn external_id_bundle(
        &self,
        unique_id: &UniqueId,
    ) -> ChronicleResult<Option<ExternalIdBundle>>;

    /// Feed of changes to stored series.
    fn change_manager(&self) -> &ChangeManager;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExternalId;

    fn bundle(ticker: &str) -> ExternalIdBundle {
        ExternalIdBundle::single(ExternalId::new("TICKER", ticker).expect("valid id"))
    }

    #[test]
    fn test_selectors_differing_in_any_field_are_distinct() {
        let a = SeriesSelector::identifiers(bundle("AAPL"), None, None, "CLOSE").expect("valid");
        let b = SeriesSelector::identifiers(bundle("AAPL"), Some("BBG".into()), None, "CLOSE")
            .expect("valid");
        let c = SeriesSelector::resolved("CLOSE", bundle("AAPL"), None).expect("valid");
        let d = a
            .clone()
            .valid_on(NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"));

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(
            a,
            SeriesSelector::identifiers(bundle("AAPL"), None, None, "CLOSE").expect("valid")
        );
    }

    #[test]
    fn test_selector_validation() {
        assert!(SeriesSelector::identifiers(ExternalIdBundle::default(), None, None, "CLOSE").is_err());
        assert!(SeriesSelector::resolved("", bundle("AAPL"), None).is_err());
    }

    #[test]
    fn test_batch_selector_matches_single_selector() {
        let request = SeriesBatchRequest::new(
            [bundle("AAPL"), bundle("MSFT")],
            Some("BBG".into()),
            None,
            "CLOSE",
        );
        let single = SeriesSelector::identifiers(bundle("AAPL"), Some("BBG".into()), None, "CLOSE")
            .expect("valid");
        assert_eq!(request.selector_for(&bundle("AAPL")), single);

        let narrowed = request.with_identifiers([bundle("MSFT")]);
        assert_eq!(narrowed.identifiers.len(), 1);
        assert_eq!(narrowed.data_field, "CLOSE");
    }

    #[test]
    fn test_external_ids_of_selectors() {
        let by_bundle = SeriesSelector::identifiers(bundle("AAPL"), None, None, "CLOSE").expect("valid");
        let resolved = SeriesSelector::resolved("CLOSE", bundle("MSFT"), None).expect("valid");
        let by_id = SeriesSelector::unique_id("DbHts~1".parse().expect("valid id"));

        assert_eq!(by_bundle.external_ids(), Some(&bundle("AAPL")));
        assert_eq!(resolved.external_ids(), Some(&bundle("MSFT")));
        assert_eq!(by_id.external_ids(), None);
    }
}

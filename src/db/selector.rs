//! Weighted data source selection.

use crate::error::{DataError, DataResult};
use crate::models::{DataSource, FeatureSet, StatementKind};
use rand::Rng;
use std::sync::Arc;
use tracing::trace;

/// What an operation needs from a data source.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Logical source name; several physical sources may share one.
    pub name: Option<&'a str>,
    pub kind: StatementKind,
    pub driver: Option<&'a str>,
    pub features: Option<&'a FeatureSet>,
}

impl<'a> Selection<'a> {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            name: None,
            kind,
            driver: None,
            features: None,
        }
    }

    pub fn named(mut self, name: Option<&'a str>) -> Self {
        self.name = name;
        self
    }

    pub fn driver(mut self, driver: Option<&'a str>) -> Self {
        self.driver = driver;
        self
    }

    pub fn features(mut self, features: Option<&'a FeatureSet>) -> Self {
        self.features = features;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    sources: Vec<Arc<DataSource>>,
}

impl SourceSelector {
    pub fn new(sources: Vec<Arc<DataSource>>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[Arc<DataSource>] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Arc<DataSource>> {
        self.sources
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    /// Pick a source able to run the operation, weighted by source weight.
    pub fn select(&self, selection: &Selection<'_>) -> DataResult<Arc<DataSource>> {
        let read = selection.kind.is_read();
        let candidates: Vec<&Arc<DataSource>> = self
            .sources
            .iter()
            .filter(|s| {
                selection
                    .name
                    .is_none_or(|name| s.name().eq_ignore_ascii_case(name))
            })
            .filter(|s| {
                selection
                    .driver
                    .is_none_or(|driver| s.driver().eq_ignore_ascii_case(driver))
            })
            .filter(|s| {
                let mode = s.mode();
                if read { mode.can_read() } else { mode.can_write() }
            })
            .filter(|s| {
                selection
                    .features
                    .is_none_or(|required| s.features().contains_all(required))
            })
            .collect();

        let chosen = pick_weighted(&candidates, &mut rand::thread_rng()).ok_or_else(|| {
            let name = selection.name.unwrap_or("*");
            DataError::no_source(format!(
                "{} ({}-capable{})",
                name,
                if read { "read" } else { "write" },
                selection
                    .driver
                    .map(|d| format!(", driver {}", d))
                    .unwrap_or_default()
            ))
        })?;

        trace!(
            source = %chosen.name(),
            operation = %selection.kind,
            candidates = candidates.len(),
            "Data source selected"
        );
        Ok(Arc::clone(chosen))
    }
}

/// Weighted random pick. Zero-weight sources are only chosen when every
/// candidate has zero weight.
fn pick_weighted<'a, R: Rng + ?Sized>(
    candidates: &[&'a Arc<DataSource>],
    rng: &mut R,
) -> Option<&'a Arc<DataSource>> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        _ => {
            let total: u64 = candidates.iter().map(|s| s.weight() as u64).sum();
            if total == 0 {
                return Some(candidates[rng.gen_range(0..candidates.len())]);
            }
            let mut point = rng.gen_range(0..total);
            for source in candidates {
                let weight = source.weight() as u64;
                if point < weight {
                    return Some(*source);
                }
                point -= weight;
            }
            candidates.last().copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feature, SourceMode};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn source(name: &str, mode: SourceMode, weight: u32) -> Arc<DataSource> {
        Arc::new(
            DataSource::new(name, "sqlite::memory:", "sqlite")
                .with_mode(mode)
                .with_weight(weight),
        )
    }

    #[test]
    fn test_reads_skip_write_only_sources() {
        let selector = SourceSelector::new(vec![
            source("primary", SourceMode::Write, 1),
            source("replica", SourceMode::Read, 1),
        ]);
        for _ in 0..20 {
            let chosen = selector.select(&Selection::new(StatementKind::Select)).unwrap();
            assert_eq!(chosen.name(), "replica");
            let chosen = selector.select(&Selection::new(StatementKind::Insert)).unwrap();
            assert_eq!(chosen.name(), "primary");
        }
    }

    #[test]
    fn test_no_source_for_name() {
        let selector = SourceSelector::new(vec![source("main", SourceMode::All, 1)]);
        let err = selector
            .select(&Selection::new(StatementKind::Select).named(Some("archive")))
            .unwrap_err();
        assert!(matches!(err, DataError::NoSource { .. }));
    }

    #[test]
    fn test_driver_and_feature_filters() {
        let mars = Arc::new(
            DataSource::new("main", "mssql://db", "mssql")
                .with_features(FeatureSet::new().with(Feature::MultipleActiveResultSets)),
        );
        let selector =
            SourceSelector::new(vec![source("main", SourceMode::All, 5), Arc::clone(&mars)]);
        let required = FeatureSet::new().with(Feature::MultipleActiveResultSets);

        let chosen = selector
            .select(&Selection::new(StatementKind::Select).features(Some(&required)))
            .unwrap();
        assert!(Arc::ptr_eq(&chosen, &mars));

        let chosen = selector
            .select(&Selection::new(StatementKind::Update).driver(Some("sqlite")))
            .unwrap();
        assert_eq!(chosen.driver(), "sqlite");
    }

    #[test]
    fn test_zero_weight_never_chosen_when_others_weighted() {
        let a = source("a", SourceMode::All, 0);
        let b = source("b", SourceMode::All, 3);
        let candidates = vec![&a, &b];
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let chosen = pick_weighted(&candidates, &mut rng).unwrap();
            assert_eq!(chosen.name(), "b");
        }
    }

    #[test]
    fn test_weights_shape_distribution() {
        let light = source("light", SourceMode::All, 1);
        let heavy = source("heavy", SourceMode::All, 9);
        let candidates = vec![&light, &heavy];
        let mut rng = StdRng::seed_from_u64(42);
        let heavy_hits = (0..1000)
            .filter(|_| pick_weighted(&candidates, &mut rng).unwrap().name() == "heavy")
            .count();
        assert!(heavy_hits > 800, "heavy chosen {heavy_hits} times");
    }
}

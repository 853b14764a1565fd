//! Cascading location selector
//!
//! Owns the chosen district/sector/cell/village and the option list fetched
//! for each level. Changing a level clears every level below it and refetches
//! the options of its immediate child.
//!
//! Each level carries a request generation. Clearing a level bumps its
//! generation, and a lookup response is applied only if the generation it was
//! issued under is still current, so a slow response for an abandoned parent
//! can never overwrite the options of the parent chosen after it.
//!
//! The state lock is never held across a lookup.

use preg_common::LocationSelection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use crate::location::{LocationError, LocationSource};

/// Level of the administrative hierarchy below the fixed province
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    District,
    Sector,
    Cell,
    Village,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::District, Level::Sector, Level::Cell, Level::Village];

    fn index(self) -> usize {
        match self {
            Level::District => 0,
            Level::Sector => 1,
            Level::Cell => 2,
            Level::Village => 3,
        }
    }

    pub fn parent(self) -> Option<Level> {
        match self {
            Level::District => None,
            Level::Sector => Some(Level::District),
            Level::Cell => Some(Level::Sector),
            Level::Village => Some(Level::Cell),
        }
    }

    pub fn child(self) -> Option<Level> {
        match self {
            Level::District => Some(Level::Sector),
            Level::Sector => Some(Level::Cell),
            Level::Cell => Some(Level::Village),
            Level::Village => None,
        }
    }

    /// Levels strictly below this one, nearest first
    pub fn descendants(self) -> impl Iterator<Item = Level> {
        Level::ALL.into_iter().skip(self.index() + 1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::District => "district",
            Level::Sector => "sector",
            Level::Cell => "cell",
            Level::Village => "village",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "district" => Ok(Level::District),
            "sector" => Ok(Level::Sector),
            "cell" => Ok(Level::Cell),
            "village" => Ok(Level::Village),
            other => Err(SelectorError::UnknownLevel(other.to_string())),
        }
    }
}

/// Selector errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Unknown location level: {0}")]
    UnknownLevel(String),

    #[error("Cannot choose a {level} before choosing a {parent}")]
    ParentNotSelected { level: Level, parent: Level },
}

/// Value and options of one level
#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelState {
    pub value: String,
    pub options: Vec<String>,
    /// A lookup for this level's options is in flight
    pub loading: bool,
    /// Last lookup failed; options were emptied
    pub error: Option<String>,
    #[serde(skip)]
    generation: u64,
}

/// Point-in-time copy of all four levels
#[derive(Debug, Clone, Serialize)]
pub struct SelectorSnapshot {
    pub district: LevelState,
    pub sector: LevelState,
    pub cell: LevelState,
    pub village: LevelState,
}

#[derive(Debug, Default)]
struct SelectorState {
    levels: [LevelState; 4],
    districts_loaded: bool,
}

impl SelectorState {
    fn level(&self, level: Level) -> &LevelState {
        &self.levels[level.index()]
    }

    fn level_mut(&mut self, level: Level) -> &mut LevelState {
        &mut self.levels[level.index()]
    }

    fn clear_selection(&mut self) {
        self.level_mut(Level::District).value.clear();
        for level in Level::District.descendants() {
            let entry = self.level_mut(level);
            entry.value.clear();
            entry.options.clear();
            entry.loading = false;
            entry.error = None;
            entry.generation += 1;
        }
    }

    fn selection(&self) -> LocationSelection {
        LocationSelection {
            district: self.level(Level::District).value.clone(),
            sector: self.level(Level::Sector).value.clone(),
            cell: self.level(Level::Cell).value.clone(),
            village: self.level(Level::Village).value.clone(),
        }
    }
}

/// Cascading selector for one registration form
pub struct SelectorController {
    source: Arc<dyn LocationSource>,
    state: Mutex<SelectorState>,
}

impl SelectorController {
    pub fn new(source: Arc<dyn LocationSource>) -> Self {
        Self {
            source,
            state: Mutex::new(SelectorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SelectorState> {
        // No invariant spans a panic point, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load district options; only the first successful load fetches
    pub async fn mount(&self) {
        let generation = {
            let mut state = self.state();
            if state.districts_loaded {
                return;
            }
            let district = state.level_mut(Level::District);
            district.generation += 1;
            district.loading = true;
            district.generation
        };

        let result = self.source.districts().await;
        self.apply(Level::District, generation, result);
    }

    pub async fn set_district(&self, value: impl Into<String>) -> Result<(), SelectorError> {
        self.select(Level::District, value.into()).await
    }

    pub async fn set_sector(&self, value: impl Into<String>) -> Result<(), SelectorError> {
        self.select(Level::Sector, value.into()).await
    }

    pub async fn set_cell(&self, value: impl Into<String>) -> Result<(), SelectorError> {
        self.select(Level::Cell, value.into()).await
    }

    pub async fn set_village(&self, value: impl Into<String>) -> Result<(), SelectorError> {
        self.select(Level::Village, value.into()).await
    }

    /// Set one level, reset everything below it and refetch its child options
    pub async fn select(&self, level: Level, value: String) -> Result<(), SelectorError> {
        let request = {
            let mut state = self.state();

            if let Some(parent) = level.parent() {
                if !value.is_empty() && state.level(parent).value.is_empty() {
                    return Err(SelectorError::ParentNotSelected { level, parent });
                }
            }

            state.level_mut(level).value = value;

            for descendant in level.descendants() {
                let entry = state.level_mut(descendant);
                entry.value.clear();
                entry.options.clear();
                entry.loading = false;
                entry.error = None;
                entry.generation += 1;
            }

            match level.child() {
                Some(child) if !state.level(level).value.is_empty() => {
                    let selection = state.selection();
                    let entry = state.level_mut(child);
                    entry.loading = true;
                    Some((child, entry.generation, selection))
                }
                _ => None,
            }
        };

        if let Some((child, generation, selection)) = request {
            let result = self.fetch(child, &selection).await;
            self.apply(child, generation, result);
        }

        Ok(())
    }

    async fn fetch(
        &self,
        level: Level,
        selection: &LocationSelection,
    ) -> Result<Vec<String>, LocationError> {
        match level {
            Level::District => self.source.districts().await,
            Level::Sector => self.source.sectors(&selection.district).await,
            Level::Cell => {
                self.source
                    .cells(&selection.district, &selection.sector)
                    .await
            }
            Level::Village => {
                self.source
                    .villages(&selection.district, &selection.sector, &selection.cell)
                    .await
            }
        }
    }

    /// Store a lookup result unless the level moved on since it was issued
    ///
    /// Returns whether the result was applied.
    fn apply(
        &self,
        level: Level,
        generation: u64,
        result: Result<Vec<String>, LocationError>,
    ) -> bool {
        let mut state = self.state();
        let entry = state.level_mut(level);

        if entry.generation != generation {
            debug!(
                level = %level,
                issued = generation,
                current = entry.generation,
                "Discarding stale location options"
            );
            return false;
        }

        entry.loading = false;
        match result {
            Ok(options) => {
                entry.options = options;
                entry.error = None;
                if level == Level::District {
                    state.districts_loaded = true;
                }
            }
            Err(e) => {
                warn!(level = %level, error = %e, "Location lookup failed");
                entry.options.clear();
                entry.error = Some(e.to_string());
            }
        }

        true
    }

    /// Current four values
    pub fn selection(&self) -> LocationSelection {
        self.state().selection()
    }

    pub fn snapshot(&self) -> SelectorSnapshot {
        let state = self.state();
        SelectorSnapshot {
            district: state.level(Level::District).clone(),
            sector: state.level(Level::Sector).clone(),
            cell: state.level(Level::Cell).clone(),
            village: state.level(Level::Village).clone(),
        }
    }

    /// Clear all four values for a fresh form, keeping fetched district options
    pub fn reset_selection(&self) {
        self.state().clear_selection();
    }

    /// Clear the selection only if it still equals `submitted`
    ///
    /// Returns false, leaving the newer values in place, when a level was
    /// changed after `submitted` was read.
    pub fn reset_selection_if(&self, submitted: &LocationSelection) -> bool {
        let mut state = self.state();
        if state.selection() != *submitted {
            return false;
        }
        state.clear_selection();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Canned hierarchy; counts calls and can hold sector lookups on a gate
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        fail_sectors: bool,
        gates: Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl FakeSource {
        fn gate(&self, district: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates
                .lock()
                .unwrap()
                .insert(district.to_string(), gate.clone());
            gate
        }
    }

    #[async_trait]
    impl LocationSource for FakeSource {
        async fn districts(&self) -> Result<Vec<String>, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["Gasabo".into(), "Kicukiro".into(), "Nyarugenge".into()])
        }

        async fn sectors(&self, district: &str) -> Result<Vec<String>, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.gates.lock().unwrap().get(district).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_sectors {
                return Err(LocationError::Api(503, "unavailable".into()));
            }
            Ok(vec![format!("{district}-S1"), format!("{district}-S2")])
        }

        async fn cells(&self, district: &str, sector: &str) -> Result<Vec<String>, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{district}/{sector}-C1")])
        }

        async fn villages(
            &self,
            _district: &str,
            _sector: &str,
            cell: &str,
        ) -> Result<Vec<String>, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{cell}-V1"), format!("{cell}-V2")])
        }
    }

    fn controller(source: Arc<FakeSource>) -> SelectorController {
        SelectorController::new(source)
    }

    async fn fully_selected(source: Arc<FakeSource>) -> SelectorController {
        let selector = controller(source);
        selector.mount().await;
        selector.set_district("Gasabo").await.unwrap();
        selector.set_sector("Gasabo-S1").await.unwrap();
        selector.set_cell("Gasabo/Gasabo-S1-C1").await.unwrap();
        selector.set_village("Gasabo/Gasabo-S1-C1-V2").await.unwrap();
        selector
    }

    #[tokio::test]
    async fn test_mount_loads_districts_without_preselection() {
        let source = Arc::new(FakeSource::default());
        let selector = controller(source.clone());

        selector.mount().await;
        selector.mount().await;

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.district.options, vec!["Gasabo", "Kicukiro", "Nyarugenge"]);
        assert_eq!(snapshot.district.value, "");
        // Districts are fetched once per session
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_cascade() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.sector.options, vec!["Gasabo-S1", "Gasabo-S2"]);
        assert_eq!(snapshot.cell.options, vec!["Gasabo/Gasabo-S1-C1"]);
        assert_eq!(snapshot.village.options.len(), 2);
        assert_eq!(
            selector.selection(),
            LocationSelection {
                district: "Gasabo".into(),
                sector: "Gasabo-S1".into(),
                cell: "Gasabo/Gasabo-S1-C1".into(),
                village: "Gasabo/Gasabo-S1-C1-V2".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_district_change_clears_descendants() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;

        selector.set_district("Kicukiro").await.unwrap();

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.district.value, "Kicukiro");
        assert_eq!(snapshot.sector.value, "");
        assert_eq!(snapshot.sector.options, vec!["Kicukiro-S1", "Kicukiro-S2"]);
        assert_eq!(snapshot.cell.value, "");
        assert!(snapshot.cell.options.is_empty());
        assert_eq!(snapshot.village.value, "");
        assert!(snapshot.village.options.is_empty());
    }

    #[tokio::test]
    async fn test_clearing_district_makes_no_request() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source.clone()).await;
        let before = source.calls.load(Ordering::SeqCst);

        selector.set_district("").await.unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), before);
        let snapshot = selector.snapshot();
        assert!(snapshot.sector.options.is_empty());
        assert!(!snapshot.sector.loading);
    }

    #[tokio::test]
    async fn test_sector_change_keeps_district() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;

        selector.set_sector("Gasabo-S2").await.unwrap();

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.district.value, "Gasabo");
        assert_eq!(snapshot.sector.options, vec!["Gasabo-S1", "Gasabo-S2"]);
        assert_eq!(snapshot.cell.options, vec!["Gasabo/Gasabo-S2-C1"]);
        assert_eq!(snapshot.village.value, "");
        assert!(snapshot.village.options.is_empty());
    }

    #[tokio::test]
    async fn test_child_requires_parent() {
        let source = Arc::new(FakeSource::default());
        let selector = controller(source);

        let err = selector.set_cell("Anything").await.unwrap_err();
        assert_eq!(
            err,
            SelectorError::ParentNotSelected {
                level: Level::Cell,
                parent: Level::Sector
            }
        );

        // Clearing is always allowed
        assert!(selector.set_cell("").await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_empty_options_and_error() {
        let source = Arc::new(FakeSource {
            fail_sectors: true,
            ..Default::default()
        });
        let selector = controller(source);
        selector.mount().await;

        assert!(selector.set_district("Gasabo").await.is_ok());

        let snapshot = selector.snapshot();
        assert!(snapshot.sector.options.is_empty());
        assert!(snapshot.sector.error.is_some());
        assert!(!snapshot.sector.loading);
    }

    #[tokio::test]
    async fn test_stale_response_discarded() {
        let source = Arc::new(FakeSource::default());
        let gate = source.gate("Gasabo");
        let selector = Arc::new(controller(source));

        // First change stalls inside the lookup
        let slow = {
            let selector = selector.clone();
            tokio::spawn(async move { selector.set_district("Gasabo").await })
        };
        tokio::task::yield_now().await;
        while !selector.snapshot().sector.loading {
            tokio::task::yield_now().await;
        }

        // Second change resolves first
        selector.set_district("Kicukiro").await.unwrap();

        // Now let the abandoned lookup finish
        gate.notify_one();
        slow.await.unwrap().unwrap();

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.district.value, "Kicukiro");
        assert_eq!(snapshot.sector.options, vec!["Kicukiro-S1", "Kicukiro-S2"]);
    }

    #[tokio::test]
    async fn test_reset_keeps_district_options() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;

        selector.reset_selection();

        let snapshot = selector.snapshot();
        assert_eq!(snapshot.district.options.len(), 3);
        assert_eq!(selector.selection(), LocationSelection::default());
        assert!(snapshot.sector.options.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_reset_keeps_newer_choice() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;
        let submitted = selector.selection();

        // The user picks a new district while the submitted record is queued
        selector.set_district("Kicukiro").await.unwrap();

        assert!(!selector.reset_selection_if(&submitted));
        assert_eq!(selector.selection().district, "Kicukiro");
        assert_eq!(
            selector.snapshot().sector.options,
            vec!["Kicukiro-S1", "Kicukiro-S2"]
        );
    }

    #[tokio::test]
    async fn test_conditional_reset_clears_unchanged_selection() {
        let source = Arc::new(FakeSource::default());
        let selector = fully_selected(source).await;
        let submitted = selector.selection();

        assert!(selector.reset_selection_if(&submitted));
        assert_eq!(selector.selection(), LocationSelection::default());
        assert_eq!(selector.snapshot().district.options.len(), 3);
    }

    #[test]
    fn test_level_relationships() {
        assert_eq!(Level::District.parent(), None);
        assert_eq!(Level::Village.child(), None);
        assert_eq!(
            Level::Sector.descendants().collect::<Vec<_>>(),
            vec![Level::Cell, Level::Village]
        );
        assert_eq!("cell".parse::<Level>().unwrap(), Level::Cell);
        assert!("province".parse::<Level>().is_err());
    }
}

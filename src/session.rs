//! Memoized recomputation of the pipeline
//!
//! The raw deal book is loaded once per process and shared read-only. Each
//! [`Session`] keeps its own categorized copy and caches every derived table
//! by the parameters it was computed from. Failed computations are returned
//! to the caller and never cached.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::category::{categorize, CategorizedBook};
use crate::data::{load_deal_book, DealBook};
use crate::features::{build_feature_table, investor_deal_counts, FeatureKey, FeatureTable, SegmentationParams};
use crate::model::{cluster_means, elbow_curve, fit_kmeans, ClusterKey, ClusterModel, ClusterParams, ClusterProfile, ElbowPoint};

/// Process-wide memo of the raw load
#[derive(Debug, Default)]
pub struct DealBookCache {
    book: OnceCell<Arc<DealBook>>,
}

impl DealBookCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load on first call, then hand out the shared book. The paths of later
    /// calls are ignored; a failed load leaves the cache empty.
    pub fn get_or_load(&self, deals_path: &Path, lenders_path: &Path) -> crate::Result<Arc<DealBook>> {
        self.book
            .get_or_try_init(|| load_deal_book(deals_path, lenders_path).map(Arc::new))
            .cloned()
    }

    pub fn get(&self) -> Option<Arc<DealBook>> {
        self.book.get().cloned()
    }
}

/// Entries kept per memo map before it is flushed
pub const MAX_CACHED_ENTRIES: usize = 32;

fn insert_bounded<K: Eq + Hash, V>(map: &mut HashMap<K, V>, key: K, value: V) {
    if map.len() >= MAX_CACHED_ENTRIES {
        debug!(entries = map.len(), "Memo full, flushing");
        map.clear();
    }
    map.insert(key, value);
}

/// Result of one clustering request
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub features: Arc<FeatureTable>,
    pub elbow: Arc<Vec<ElbowPoint>>,
    pub model: ClusterModel,
    pub profiles: Vec<ClusterProfile>,
    /// Qualifying deal lines per investor
    pub deal_counts: BTreeMap<String, usize>,
}

/// One interactive user's view of the pipeline
#[derive(Debug)]
pub struct Session {
    book: Arc<DealBook>,
    categorized: CategorizedBook,
    feature_tables: HashMap<FeatureKey, Arc<FeatureTable>>,
    elbows: HashMap<(FeatureKey, ClusterKey), Arc<Vec<ElbowPoint>>>,
    segmentations: HashMap<(FeatureKey, ClusterKey), Arc<Segmentation>>,
}

impl Session {
    pub fn new(book: Arc<DealBook>) -> Self {
        let categorized = categorize(&book);
        info!(
            lines = categorized.lines.len(),
            dropped = categorized.dropped_lines,
            deals = categorized.deal_categories.len(),
            "Session started"
        );
        Self {
            book,
            categorized,
            feature_tables: HashMap::new(),
            elbows: HashMap::new(),
            segmentations: HashMap::new(),
        }
    }

    pub fn book(&self) -> &DealBook {
        &self.book
    }

    pub fn categorized(&self) -> &CategorizedBook {
        &self.categorized
    }

    /// Drop every memoized table; the categorized book is kept
    pub fn clear_cache(&mut self) {
        self.feature_tables.clear();
        self.elbows.clear();
        self.segmentations.clear();
    }

    pub fn feature_table(&mut self, params: &SegmentationParams) -> crate::Result<Arc<FeatureTable>> {
        let key = params.key();
        if let Some(table) = self.feature_tables.get(&key) {
            debug!("Feature table cache hit");
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(build_feature_table(&self.categorized, params)?);
        insert_bounded(&mut self.feature_tables, key, Arc::clone(&table));
        Ok(table)
    }

    /// Elbow curve for the feature table; independent of the requested `k`
    pub fn elbow(&mut self, params: &SegmentationParams, cluster: &ClusterParams) -> crate::Result<Arc<Vec<ElbowPoint>>> {
        let key = (params.key(), ClusterParams { k: 0, ..*cluster }.key());
        if let Some(curve) = self.elbows.get(&key) {
            return Ok(Arc::clone(curve));
        }

        let table = self.feature_table(params)?;
        let curve = Arc::new(elbow_curve(&table, cluster)?);
        insert_bounded(&mut self.elbows, key, Arc::clone(&curve));
        Ok(curve)
    }

    /// Feature table, elbow curve, final model and cluster means in one call
    pub fn segment(&mut self, params: &SegmentationParams, cluster: &ClusterParams) -> crate::Result<Arc<Segmentation>> {
        let key = (params.key(), cluster.key());
        if let Some(segmentation) = self.segmentations.get(&key) {
            debug!("Segmentation cache hit");
            return Ok(Arc::clone(segmentation));
        }

        let features = self.feature_table(params)?;
        let elbow = self.elbow(params, cluster)?;
        let model = fit_kmeans(&features, cluster)?;
        let profiles = cluster_means(&features, &model);
        let deal_counts = investor_deal_counts(&self.categorized, params);

        let segmentation = Arc::new(Segmentation {
            features,
            elbow,
            model,
            profiles,
            deal_counts,
        });
        insert_bounded(&mut self.segmentations, key, Arc::clone(&segmentation));
        Ok(segmentation)
    }
}

//! K-Means segmentation of investor feature vectors

use crate::error::SegmentationError;
use crate::features::FeatureTable;
use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

pub const MIN_CLUSTERS: usize = 2;
pub const MAX_CLUSTERS: usize = 12;
/// Largest cluster count probed by the elbow pass
pub const ELBOW_MAX_CLUSTERS: usize = 9;

pub const DEFAULT_CLUSTERS: usize = 4;
pub const DEFAULT_MAX_ITERS: u64 = 300;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_SEED: u64 = 42;

/// K-Means configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub k: usize,
    pub max_iters: u64,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_CLUSTERS,
            max_iters: DEFAULT_MAX_ITERS,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }
}

impl ClusterParams {
    pub fn with_k(k: usize) -> Self {
        Self {
            k,
            ..Default::default()
        }
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey {
            k: self.k,
            max_iters: self.max_iters,
            tolerance_bits: self.tolerance.to_bits(),
            seed: self.seed,
        }
    }
}

/// Hashable form of [`ClusterParams`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub k: usize,
    pub max_iters: u64,
    pub tolerance_bits: u64,
    pub seed: u64,
}

/// Fitted segmentation of the investors of one feature table
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    /// Investor names, row-aligned with `labels`
    pub investors: Vec<String>,
    pub n_clusters: usize,
    /// Cluster label per investor, in `0..n_clusters`
    pub labels: Array1<usize>,
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares
    pub inertia: f64,
}

impl ClusterModel {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }

    /// Investor name with its cluster label
    pub fn assignments(&self) -> impl Iterator<Item = (&str, usize)> + '_ {
        self.investors
            .iter()
            .map(String::as_str)
            .zip(self.labels.iter().copied())
    }

    /// Mean silhouette coefficient over the first `sample_size` investors
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n = features.nrows().min(sample_size).min(self.labels.len());
        if n < 2 {
            return 0.0;
        }

        let total: f64 = (0..n)
            .map(|i| {
                // summed distance and member count per cluster, excluding i itself
                let mut sums = vec![(0.0, 0usize); self.n_clusters];
                for j in (0..n).filter(|&j| j != i) {
                    if let Some(entry) = sums.get_mut(self.labels[j]) {
                        entry.0 += squared_distance(features.row(i), features.row(j)).sqrt();
                        entry.1 += 1;
                    }
                }

                let own = self.labels[i];
                let mean = |(sum, count): (f64, usize)| sum / count as f64;
                let a = sums.get(own).filter(|e| e.1 > 0).map_or(0.0, |&e| mean(e));
                let b = sums
                    .iter()
                    .enumerate()
                    .filter(|&(label, e)| label != own && e.1 > 0)
                    .map(|(_, &e)| mean(e))
                    .fold(f64::INFINITY, f64::min);

                if b.is_infinite() || a.max(b) == 0.0 {
                    0.0
                } else {
                    (b - a) / a.max(b)
                }
            })
            .sum();

        total / n as f64
    }
}

/// One point of the elbow curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElbowPoint {
    pub clusters: usize,
    pub inertia: f64,
}

/// Mean feature vector of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub size: usize,
    /// Column-aligned with the feature table
    pub means: Vec<f64>,
}

fn ensure_not_empty(table: &FeatureTable) -> crate::Result<()> {
    if table.is_empty() || table.n_features() == 0 {
        return Err(SegmentationError::InsufficientData(format!(
            "no qualifying investors to cluster ({} investors, {} features)",
            table.len(),
            table.n_features()
        ))
        .into());
    }
    Ok(())
}

/// Run seeded K-Means and return labels and centroids
fn run_kmeans(
    features: &Array2<f64>,
    n_clusters: usize,
    params: &ClusterParams,
) -> crate::Result<(Array1<usize>, Array2<f64>)> {
    let dataset = DatasetBase::from(features.clone());
    let rng = StdRng::seed_from_u64(params.seed);

    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)?;

    let labels = model.predict(features);
    let centroids = model.centroids().clone();
    Ok((labels, centroids))
}

/// Fit K-Means on the feature table
///
/// # Errors
/// * `InsufficientData` when the table has no investors
/// * `ClusterCountOutOfRange` when `k` is outside `2..=12`
/// * `TooFewInvestors` when `k` exceeds the number of investors
pub fn fit_kmeans(table: &FeatureTable, params: &ClusterParams) -> crate::Result<ClusterModel> {
    ensure_not_empty(table)?;

    if !(MIN_CLUSTERS..=MAX_CLUSTERS).contains(&params.k) {
        return Err(SegmentationError::ClusterCountOutOfRange {
            k: params.k,
            min: MIN_CLUSTERS,
            max: MAX_CLUSTERS,
        }
        .into());
    }

    if table.len() < params.k {
        return Err(SegmentationError::TooFewInvestors {
            k: params.k,
            investors: table.len(),
        }
        .into());
    }

    let (labels, centroids) = run_kmeans(&table.values, params.k, params)?;
    let inertia = compute_inertia(&table.values, &labels, &centroids);

    debug!(k = params.k, investors = table.len(), inertia, "K-Means fitted");

    Ok(ClusterModel {
        investors: table.investors.clone(),
        n_clusters: params.k,
        labels,
        centroids,
        inertia,
    })
}

/// Inertia for every cluster count from 1 to 9, capped at the number of investors
pub fn elbow_curve(table: &FeatureTable, params: &ClusterParams) -> crate::Result<Vec<ElbowPoint>> {
    ensure_not_empty(table)?;

    let max_clusters = ELBOW_MAX_CLUSTERS.min(table.len());
    let mut curve = Vec::with_capacity(max_clusters);
    for clusters in 1..=max_clusters {
        let (labels, centroids) = run_kmeans(&table.values, clusters, params)?;
        curve.push(ElbowPoint {
            clusters,
            inertia: compute_inertia(&table.values, &labels, &centroids),
        });
    }
    Ok(curve)
}

/// Average each feature column per cluster label
pub fn cluster_means(table: &FeatureTable, model: &ClusterModel) -> Vec<ClusterProfile> {
    let n_features = table.n_features();
    let mut sums = Array2::<f64>::zeros((model.n_clusters, n_features));
    let sizes = model.cluster_sizes();

    for (row, &label) in model.labels.iter().enumerate() {
        if label < model.n_clusters {
            let mut target = sums.row_mut(label);
            target += &table.values.row(row);
        }
    }

    sizes
        .iter()
        .enumerate()
        .map(|(cluster, &size)| ClusterProfile {
            cluster,
            size,
            means: if size == 0 {
                vec![0.0; n_features]
            } else {
                sums.row(cluster).iter().map(|v| v / size as f64).collect()
            },
        })
        .collect()
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    (&a - &b).mapv(|v| v * v).sum()
}

/// Within-cluster sum of squared distances to the assigned centroid
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter(|&(_, &label)| label < centroids.nrows())
        .map(|(row, &label)| squared_distance(row, centroids.row(label)))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Dimension, FeatureMatrix};

    /// Two well separated groups of three investors
    fn create_test_table() -> FeatureTable {
        let values = Array2::from_shape_vec(
            (6, 3),
            vec![
                1.0, 0.0, 0.0, //
                0.9, 0.1, 0.0, //
                0.95, 0.05, 0.0, //
                0.0, 0.1, 0.9, //
                0.0, 0.0, 1.0, //
                0.0, 0.2, 0.8, //
            ],
        )
        .unwrap();
        let investors: Vec<String> = ["A", "B", "C", "D", "E", "F"].iter().map(|s| s.to_string()).collect();

        FeatureTable::merge(vec![FeatureMatrix {
            dimension: Dimension::Sector,
            investors,
            columns: vec!["sector:X".to_string(), "sector:Y".to_string(), "sector:Z".to_string()],
            values,
        }])
    }

    fn small_table(n: usize) -> FeatureTable {
        let mut table = create_test_table();
        table.investors.truncate(n);
        table.values = table.values.slice(ndarray::s![..n, ..]).to_owned();
        table
    }

    #[test]
    fn test_fit_kmeans() {
        let table = create_test_table();
        let model = fit_kmeans(&table, &ClusterParams::with_k(2)).unwrap();

        assert_eq!(model.n_clusters, 2);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[2, 3]);
        assert!(model.labels.iter().all(|&l| l < 2));

        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[1], model.labels[2]);
        assert_eq!(model.labels[3], model.labels[4]);
        assert_eq!(model.labels[4], model.labels[5]);
        assert_ne!(model.labels[0], model.labels[3]);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let table = create_test_table();
        let params = ClusterParams::with_k(3);

        let first = fit_kmeans(&table, &params).unwrap();
        let second = fit_kmeans(&table, &params).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.inertia, second.inertia);
    }

    #[test]
    fn test_cluster_sizes() {
        let table = create_test_table();
        let model = fit_kmeans(&table, &ClusterParams::with_k(3)).unwrap();

        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes.iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_too_few_investors() {
        let table = small_table(3);
        let err = fit_kmeans(&table, &ClusterParams::with_k(5)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SegmentationError>(),
            Some(&SegmentationError::TooFewInvestors { k: 5, investors: 3 })
        );
    }

    #[test]
    fn test_invalid_cluster_count() {
        let table = create_test_table();

        let result = fit_kmeans(&table, &ClusterParams::with_k(1));
        assert!(matches!(
            result.unwrap_err().downcast_ref::<SegmentationError>(),
            Some(SegmentationError::ClusterCountOutOfRange { k: 1, .. })
        ));

        let result = fit_kmeans(&table, &ClusterParams::with_k(13));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_table_is_insufficient_data() {
        let table = FeatureTable::merge(vec![]);
        let err = fit_kmeans(&table, &ClusterParams::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SegmentationError>(),
            Some(SegmentationError::InsufficientData(_))
        ));

        assert!(elbow_curve(&table, &ClusterParams::default()).is_err());
    }

    #[test]
    fn test_duplicate_rows_still_cluster() {
        // five investors sharing two distinct profiles
        let mut table = small_table(5);
        table.values = Array2::from_shape_vec(
            (5, 3),
            vec![
                1.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                1.0, 0.0, 0.0, //
                0.0, 1.0, 0.0, //
                0.0, 1.0, 0.0, //
            ],
        )
        .unwrap();

        let model = fit_kmeans(&table, &ClusterParams::with_k(3)).unwrap();
        assert_eq!(model.labels.len(), 5);
        assert!(model.labels.iter().all(|&l| l < 3));
        assert_eq!(model.cluster_sizes().iter().sum::<usize>(), 5);
        assert_eq!(model.labels[0], model.labels[1]);
        assert_ne!(model.labels[0], model.labels[3]);

        let curve = elbow_curve(&table, &ClusterParams::default()).unwrap();
        assert_eq!(curve.len(), 5);
        assert!(curve.iter().all(|p| p.inertia.is_finite()));
    }

    #[test]
    fn test_elbow_curve_full_range() {
        let n = 12;
        let values = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i * i) as f64 / 10.0 });
        let investors: Vec<String> = (0..n).map(|i| format!("Investor {}", i)).collect();
        let table = FeatureTable::merge(vec![FeatureMatrix {
            dimension: Dimension::Sector,
            investors,
            columns: vec!["sector:X".to_string(), "sector:Y".to_string()],
            values,
        }]);

        let curve = elbow_curve(&table, &ClusterParams::default()).unwrap();
        assert_eq!(curve.len(), ELBOW_MAX_CLUSTERS);
        assert_eq!(curve.iter().map(|p| p.clusters).collect::<Vec<_>>(), (1..=9).collect::<Vec<_>>());
        assert!(curve.iter().all(|p| p.inertia <= curve[0].inertia + 1e-9));
    }

    #[test]
    fn test_elbow_curve() {
        let table = create_test_table();
        let curve = elbow_curve(&table, &ClusterParams::default()).unwrap();

        assert_eq!(curve.len(), 6);
        assert_eq!(curve.iter().map(|p| p.clusters).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5, 6]);
        let total = curve[0].inertia;
        assert!(curve.iter().all(|p| p.inertia.is_finite() && p.inertia >= 0.0));
        assert!(curve.iter().all(|p| p.inertia <= total + 1e-9));
        assert!(curve[1].inertia < total);
    }

    #[test]
    fn test_cluster_means() {
        let table = create_test_table();
        let model = fit_kmeans(&table, &ClusterParams::with_k(2)).unwrap();
        let profiles = cluster_means(&table, &model);

        assert_eq!(profiles.len(), 2);
        let first = &profiles[model.labels[0]];
        assert_eq!(first.size, 3);
        assert!((first.means[0] - 0.95).abs() < 1e-9);
        assert!((first.means[1] - 0.05).abs() < 1e-9);
        assert_eq!(first.means[2], 0.0);
    }

    #[test]
    fn test_silhouette_for_separated_groups() {
        let table = create_test_table();
        let model = fit_kmeans(&table, &ClusterParams::with_k(2)).unwrap();
        let score = model.compute_silhouette_sample(&table.values, 100);
        assert!(score > 0.5);
    }
}

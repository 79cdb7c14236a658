//! Tabular hand-off to the presentation layer: Polars frames, CSV export and
//! console statistics

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use polars::prelude::*;
use tracing::info;

use crate::category::CategorizedBook;
use crate::data::LenderLine;
use crate::features::{FeatureMatrix, FeatureTable};
use crate::model::{ClusterProfile, ElbowPoint};
use crate::session::Segmentation;

pub const INVESTOR: &str = "investor";
pub const CLUSTER: &str = "cluster";
pub const SIZE: &str = "size";
pub const CLUSTERS: &str = "clusters";
pub const INERTIA: &str = "inertia";
pub const DEAL_CATEGORY: &str = "Deal Category";

fn line_columns<'a, I>(lines: I) -> Vec<Series>
where
    I: Iterator<Item = &'a LenderLine> + Clone,
{
    vec![
        Series::new(crate::data::DEAL_NAME, lines.clone().map(|l| l.deal.clone()).collect::<Vec<_>>()),
        Series::new(crate::data::DOMINANT_SECTOR, lines.clone().map(|l| l.sector.clone()).collect::<Vec<_>>()),
        Series::new(crate::data::DOMINANT_COUNTRY, lines.clone().map(|l| l.country.clone()).collect::<Vec<_>>()),
        Series::new(crate::data::DEBT_SIZE, lines.clone().map(|l| l.debt_size).collect::<Vec<_>>()),
        Series::new(
            crate::data::TRANSACTION_TYPE,
            lines.clone().map(|l| l.transaction_type.clone()).collect::<Vec<_>>(),
        ),
        Series::new("name", lines.clone().map(|l| l.lender.clone()).collect::<Vec<_>>()),
        Series::new("valueEUR", lines.clone().map(|l| l.funded).collect::<Vec<Option<f64>>>()),
        Series::new(crate::data::LENDER_KIND, lines.clone().map(|l| l.kind.to_string()).collect::<Vec<_>>()),
        Series::new(crate::data::LENDER_CATEGORY, lines.map(|l| l.category.clone()).collect::<Vec<_>>()),
    ]
}

/// Lender line table, one row per lender per deal
pub fn lender_lines_frame(lines: &[LenderLine]) -> crate::Result<DataFrame> {
    Ok(DataFrame::new(line_columns(lines.iter()))?)
}

/// Lender lines with their deal category attached
pub fn categorized_lines_frame(book: &CategorizedBook) -> crate::Result<DataFrame> {
    let mut columns = line_columns(book.lines.iter().map(|l| &l.line));
    columns.push(Series::new(
        DEAL_CATEGORY,
        book.lines.iter().map(|l| l.category.to_string()).collect::<Vec<_>>(),
    ));
    Ok(DataFrame::new(columns)?)
}

fn investor_feature_columns(investors: &[String], columns: &[String], values: &ndarray::Array2<f64>) -> Vec<Series> {
    let mut series = Vec::with_capacity(columns.len() + 1);
    series.push(Series::new(INVESTOR, investors.to_vec()));
    for (idx, name) in columns.iter().enumerate() {
        series.push(Series::new(name, values.column(idx).to_vec()));
    }
    series
}

/// One dimension's share matrix
pub fn feature_matrix_frame(matrix: &FeatureMatrix) -> crate::Result<DataFrame> {
    Ok(DataFrame::new(investor_feature_columns(
        &matrix.investors,
        &matrix.columns,
        &matrix.values,
    ))?)
}

/// Concatenated investor feature vectors
pub fn feature_table_frame(table: &FeatureTable) -> crate::Result<DataFrame> {
    Ok(DataFrame::new(investor_feature_columns(
        &table.investors,
        &table.columns,
        &table.values,
    ))?)
}

/// Cluster count against inertia
pub fn elbow_frame(curve: &[ElbowPoint]) -> crate::Result<DataFrame> {
    let df = df!(
        CLUSTERS => curve.iter().map(|p| p.clusters as u32).collect::<Vec<_>>(),
        INERTIA => curve.iter().map(|p| p.inertia).collect::<Vec<_>>()
    )?;
    Ok(df)
}

/// Investor, cluster label and the features the label was computed from
pub fn assignments_frame(segmentation: &Segmentation) -> crate::Result<DataFrame> {
    let features = &segmentation.features;
    let mut columns = investor_feature_columns(&features.investors, &features.columns, &features.values);
    let labels: Vec<u32> = segmentation.model.labels.iter().map(|&l| l as u32).collect();
    columns.insert(1, Series::new(CLUSTER, labels));
    Ok(DataFrame::new(columns)?)
}

/// Mean feature vector per cluster
pub fn cluster_means_frame(feature_columns: &[String], profiles: &[ClusterProfile]) -> crate::Result<DataFrame> {
    let mut columns = vec![
        Series::new(CLUSTER, profiles.iter().map(|p| p.cluster as u32).collect::<Vec<_>>()),
        Series::new(SIZE, profiles.iter().map(|p| p.size as u32).collect::<Vec<_>>()),
    ];
    for (idx, name) in feature_columns.iter().enumerate() {
        columns.push(Series::new(
            name,
            profiles.iter().map(|p| p.means[idx]).collect::<Vec<_>>(),
        ));
    }
    Ok(DataFrame::new(columns)?)
}

/// Write the assignment table as UTF-8 CSV with a header row
pub fn export_assignments_csv(segmentation: &Segmentation, output_path: impl AsRef<Path>) -> crate::Result<()> {
    let path = output_path.as_ref();
    let mut df = assignments_frame(segmentation)?;
    let mut file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;

    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;

    info!(path = %path.display(), rows = df.height(), "Cluster assignments exported");
    Ok(())
}

/// Print cluster statistics to console
pub fn print_cluster_statistics(segmentation: &Segmentation) {
    let model = &segmentation.model;
    let features = &segmentation.features;
    let total = features.len();

    println!("\n=== Elbow Curve ===");
    for point in segmentation.elbow.iter() {
        println!("  k = {:2} | inertia {:10.4}", point.clusters, point.inertia);
    }

    println!("\n=== Cluster Statistics ===");
    println!("Number of clusters: {}", model.n_clusters);
    println!("Qualifying investors: {}", total);
    println!("Within-cluster sum of squares (Inertia): {:.4}", model.inertia);

    let silhouette_score = model.compute_silhouette_sample(&features.values, 100);
    println!("Silhouette score (sample): {:.3}", silhouette_score);

    println!("\nCluster sizes:");
    let mut cluster_deals = vec![0usize; model.n_clusters];
    for (investor, label) in model.assignments() {
        if let Some(total_deals) = cluster_deals.get_mut(label) {
            *total_deals += segmentation.deal_counts.get(investor).copied().unwrap_or(0);
        }
    }
    for (i, &size) in model.cluster_sizes().iter().enumerate() {
        let percentage = (size as f64 / total as f64) * 100.0;
        println!(
            "  Cluster {}: {} investors ({:.1}%), {} deal lines",
            i, size, percentage, cluster_deals[i]
        );
    }

    println!("\nCluster means:");
    for profile in &segmentation.profiles {
        println!("  Cluster {} ({} investors)", profile.cluster, profile.size);
        for (name, mean) in features.columns.iter().zip(profile.means.iter()) {
            if *mean > 0.0 {
                println!("    {:<40} {:6.1}%", name, mean * 100.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::categorize;
    use crate::data::fixtures::*;
    use crate::data::{DealBook, LenderKind};
    use crate::features::SegmentationParams;
    use crate::model::ClusterParams;
    use crate::session::Session;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_book() -> DealBook {
        let deals = vec![
            deal("D1", "Renewables", "Spain", "Greenfield", vec![funding("Alpha", 50.0), funding("Bank", 50.0)]),
            deal("D2", "Renewables", "Spain", "Greenfield", vec![funding("Alpha", 40.0), funding("Beta", 70.0)]),
            deal("D3", "Transport", "France", "Refinancing", vec![funding("Beta", 150.0), funding("Gamma", 20.0)]),
            deal("D4", "Transport", "France", "Refinancing", vec![funding("Gamma", 90.0), funding("Alpha", 120.0)]),
        ];
        let lenders = vec![
            profile("Alpha", LenderKind::Insto, "Asset Manager"),
            profile("Beta", LenderKind::Insto, "Pension Fund"),
            profile("Gamma", LenderKind::Insto, "Insurance"),
            profile("Bank", LenderKind::Bank, "Commercial Bank"),
        ];
        DealBook::from_tables(deals, lenders)
    }

    fn test_segmentation() -> Arc<Segmentation> {
        let book = Arc::new(test_book());
        let mut session = Session::new(Arc::clone(&book));
        let params = SegmentationParams::new(book.insto_categories());
        session.segment(&params, &ClusterParams::with_k(2)).unwrap()
    }

    #[test]
    fn test_line_frames() {
        let book = test_book();
        let df = lender_lines_frame(&book.lines).unwrap();
        assert_eq!(df.height(), 8);
        assert_eq!(df.width(), 9);

        let categorized = categorize(&book);
        let df = categorized_lines_frame(&categorized).unwrap();
        assert_eq!(df.width(), 10);
        let labels: Vec<Option<&str>> = df.column(DEAL_CATEGORY).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(labels[0], Some("Mixed"));
        assert_eq!(labels[2], Some("Insto only"));
    }

    #[test]
    fn test_assignments_frame() {
        let segmentation = test_segmentation();
        let df = assignments_frame(&segmentation).unwrap();

        assert_eq!(df.height(), 3);
        assert_eq!(df.width(), segmentation.features.n_features() + 2);
        let names = df.get_column_names();
        assert_eq!(names[0], INVESTOR);
        assert_eq!(names[1], CLUSTER);
    }

    #[test]
    fn test_summary_frames() {
        let segmentation = test_segmentation();

        let elbow = elbow_frame(&segmentation.elbow).unwrap();
        assert_eq!(elbow.height(), 3);

        let means = cluster_means_frame(&segmentation.features.columns, &segmentation.profiles).unwrap();
        assert_eq!(means.height(), 2);
        assert_eq!(means.width(), segmentation.features.n_features() + 2);

        for block in &segmentation.features.blocks {
            let df = feature_matrix_frame(block).unwrap();
            assert_eq!(df.height(), 3);
        }
        assert_eq!(feature_table_frame(&segmentation.features).unwrap().height(), 3);
    }

    #[test]
    fn test_export_assignments_csv() {
        let segmentation = test_segmentation();
        let temp_dir = tempdir().unwrap();
        let output_path = temp_dir.path().join("assignments.csv");

        export_assignments_csv(&segmentation, &output_path).unwrap();

        let content = std::fs::read_to_string(&output_path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("investor,cluster,"));
        assert!(header.contains("ticket:≤60"));
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn test_print_cluster_statistics() {
        let segmentation = test_segmentation();
        print_cluster_statistics(&segmentation);
    }
}

//! Output formatting for CLI commands.
//!
//! Reports are printed either as pretty JSON or as human-readable text.

use anyhow::Result;
use storyline::{ClusterRunReport, Metrics, UserEmbedding, UserRunReport};

fn ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print a clustering run report.
pub fn print_cluster_report(report: &ClusterRunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Clustering Results");
    println!("{}", "=".repeat(60));
    println!(
        "Strategy: {:?}  |  Articles: {}  |  Clusters: {}",
        report.strategy,
        report.total_items,
        report.clusters.len()
    );
    println!(
        "Embedded: {}  |  Sentinel: {}  |  Clustered: {}",
        report.embedded, report.sentinel, report.clustered
    );
    println!();

    for cluster in &report.clusters {
        println!(
            "Cluster {} ({} articles): {}",
            cluster.cluster_id,
            cluster.len(),
            ids(&cluster.item_ids)
        );
    }
    if report.clusters.is_empty() {
        println!("No clusters formed.");
    }
    if !report.noise.is_empty() {
        println!("\nNoise: {}", ids(&report.noise));
    }
    if !report.filtered.is_empty() {
        println!("Filtered (no usable embedding): {}", ids(&report.filtered));
    }
    if report.failed_upserts > 0 {
        println!("\nFailed upserts: {}", report.failed_upserts);
    }
    Ok(())
}

/// Print a bulk user embedding report.
pub fn print_user_report(report: &UserRunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("User Embeddings");
    println!("{}", "=".repeat(40));
    println!("Users:              {}", report.total_users);
    println!("From interactions:  {}", report.interactions);
    println!("From preferences:   {}", report.section_preference);
    println!("From global mean:   {}", report.global_mean);
    println!("Skipped:            {}", report.skipped);
    println!("Failed:             {}", report.failed);
    println!("Upserted:           {}", report.upserted);
    Ok(())
}

/// Print the result of a single-user recalculation.
pub fn print_user_embedding(user_id: i64, embedding: Option<&UserEmbedding>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&embedding)?);
        return Ok(());
    }

    match embedding {
        Some(embedding) => {
            let preview: Vec<String> = embedding
                .vector
                .iter()
                .take(8)
                .map(|x| format!("{:.4}", x))
                .collect();
            println!("User ID:   {}", embedding.user_id);
            println!("Source:    {:?}", embedding.source);
            println!("Dimension: {}", embedding.vector.len());
            println!("Vector:    [{}, ...]", preview.join(", "));
        }
        None => println!("No embedding could be computed for user {}.", user_id),
    }
    Ok(())
}

/// Print the run's metrics to stderr: a JSON snapshot or the Prometheus text format.
pub fn print_metrics(metrics: &Metrics, json: bool) -> Result<()> {
    if json {
        eprintln!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    } else {
        eprintln!("{}", metrics.export());
    }
    Ok(())
}

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::timeout;

use slamflow::config::defs::{PipelineError, COLLAPSED_SLOT, FILTERED_SLOT, VCF_SLOT};
use slamflow::engine::{RecordKey, RunReport, Scheduler, SchedulerSettings};
use slamflow::pipelines::slamseq::{build_topology, PipelineFlags};
use slamflow::Arguments;

use common::{refs, registry, MockExecutor};


fn flags(extra: &[&str]) -> PipelineFlags {
    let mut argv = vec!["slamflow", "--read-length", "50"];
    argv.extend_from_slice(extra);
    PipelineFlags::from_args(&Arguments::parse_from(argv)).unwrap()
}

fn settings(max_forks: usize, heavy_forks: usize, fail_fast: bool) -> SchedulerSettings {
    SchedulerSettings {
        max_forks,
        heavy_forks,
        fail_fast,
        work_root: std::env::temp_dir().join("slamflow-tests"),
    }
}

async fn run_graph(
    samples: &[(&str, &str)],
    extra: &[&str],
    settings: SchedulerSettings,
    executor: Arc<MockExecutor>,
) -> Result<Result<RunReport, PipelineError>> {
    let graph = build_topology(&flags(extra), &refs(), &registry(samples))?;
    let scheduler = Scheduler::new(settings);
    let run = scheduler.run(graph, executor);
    Ok(timeout(Duration::from_secs(20), run).await?)
}


#[tokio::test]
async fn test_two_sample_run() -> Result<()> {
    let executor = Arc::new(MockExecutor::new(2));
    let report = run_graph(&[("A", "G1"), ("B", "G1")], &[], settings(4, 2, true), executor.clone()).await??;

    assert!(report.is_success());
    for stage in ["trim", "map", "filter", "snp", "count", "collapse", "rates", "utrrates", "tcperreadpos", "tcperutrpos"] {
        assert_eq!(report.completed(stage), 2, "{}", stage);
    }
    assert_eq!(report.completed("summary"), 1);
    assert_eq!(report.completed("deseq2"), 1);
    assert_eq!(report.completed("report"), 1);
    assert_eq!(report.join_drops(), 0);

    // Deseq2 sees one record for G1 carrying both collapsed tables
    let grouped = executor.records_for("deseq2");
    assert_eq!(grouped.len(), 1);
    assert_eq!(grouped[0].key(), &RecordKey::Group("G1".to_string()));
    let names: Vec<&str> = grouped[0].samples().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
    assert_eq!(grouped[0].paths(COLLAPSED_SLOT).len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_summary_waits_for_every_sample() -> Result<()> {
    let samples = [("A", "G1"), ("B", "G1"), ("C", "G2"), ("D", "G2"), ("E", "G2")];
    let executor = Arc::new(MockExecutor::new(3));
    let report = run_graph(&samples, &["--quantseq"], settings(3, 1, true), executor.clone()).await??;
    assert!(report.is_success());

    let summary = executor.records_for("summary");
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].paths(FILTERED_SLOT).len(), samples.len());

    let summary_at = executor.position("summary", "all").unwrap();
    for (name, _) in samples {
        assert!(executor.position("filter", name).unwrap() < summary_at);
    }

    let outcome = report.barrier("summary.input");
    assert_eq!(outcome.len(), 1);
    assert!(outcome[0].fired);
    assert_eq!(outcome[0].received, samples.len());
    Ok(())
}

#[tokio::test]
async fn test_skip_snp_pairs_every_sample_with_placeholder() -> Result<()> {
    let executor = Arc::new(MockExecutor::new(1));
    let report = run_graph(&[("A", "G1"), ("B", "G2")], &["--skip-snp"], settings(4, 2, true), executor.clone()).await??;
    assert!(report.is_success());
    assert_eq!(report.completed("snp"), 0);

    let counted = executor.records_for("count");
    assert_eq!(counted.len(), 2);
    for record in counted {
        assert!(record.artifact(VCF_SLOT).map(|a| a.is_absent()).unwrap_or(false));
    }
    Ok(())
}

#[tokio::test]
async fn test_ignore_mode_reports_starved_group() -> Result<()> {
    let executor = Arc::new(MockExecutor::new(1).failing("count", "B"));
    let report = run_graph(&[("A", "G1"), ("B", "G1")], &[], settings(4, 2, false), executor.clone()).await??;

    assert!(!report.is_success());
    assert!(!report.cancelled);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, "count");
    assert_eq!(report.failures[0].key, "B");
    assert_eq!(report.completed("collapse"), 1);
    assert_eq!(report.completed("deseq2"), 0);

    let starved = report.starved();
    assert_eq!(starved.len(), 1);
    assert_eq!(starved[0].barrier, "deseq2.input");
    assert_eq!(starved[0].expected, Some(2));
    assert_eq!(starved[0].received, 1);

    // Branches independent of the failed key still finish
    assert_eq!(report.completed("summary"), 1);
    assert_eq!(report.completed("report"), 1);
    Ok(())
}

#[tokio::test]
async fn test_ignore_mode_counts_join_drops() -> Result<()> {
    let executor = Arc::new(MockExecutor::new(1).failing("snp", "B"));
    let report = run_graph(&[("A", "G1"), ("B", "G1")], &["--skip-deseq2"], settings(4, 2, false), executor).await??;

    assert!(!report.is_success());
    assert_eq!(report.join_drops(), 1);
    assert_eq!(report.join_mismatches[0].join, "variants");
    assert_eq!(report.join_mismatches[0].left_only, vec!["B".to_string()]);
    assert_eq!(report.completed("count"), 1);

    // Three stat tables for B never arrive
    let report_barrier = report.barrier("report.input");
    assert!(!report_barrier[0].fired);
    assert_eq!(report_barrier[0].expected, Some(9));
    assert_eq!(report_barrier[0].received, 6);
    Ok(())
}

#[tokio::test]
async fn test_fail_fast_tears_down() -> Result<()> {
    let samples = [("A", "G1"), ("B", "G1"), ("C", "G1"), ("D", "G1")];
    let executor = Arc::new(MockExecutor::new(5).failing("map", "A"));
    let outcome = run_graph(&samples, &[], settings(2, 1, true), executor.clone()).await?;

    match outcome {
        Err(PipelineError::StageFailed { stage, key, .. }) => {
            assert_eq!(stage, "map");
            assert_eq!(key, "A");
        }
        other => panic!("expected a stage failure, got {:?}", other.map(|r| r.completed)),
    }
    assert!(executor.records_for("summary").is_empty());
    assert!(executor.records_for("report").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_concurrency_bounds() -> Result<()> {
    let samples: Vec<(String, &str)> = (0..8).map(|i| (format!("S{}", i), "G1")).collect();
    let samples: Vec<(&str, &str)> = samples.iter().map(|(n, g)| (n.as_str(), *g)).collect();
    let executor = Arc::new(MockExecutor::new(5));
    let report = run_graph(&samples, &[], settings(3, 1, true), executor.clone()).await??;

    assert!(report.is_success());
    assert!(executor.peak() <= 3, "peak {}", executor.peak());
    assert!(executor.peak() >= 2);
    assert_eq!(executor.heavy_peak(), 1);
    Ok(())
}

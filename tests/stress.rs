mod common;

use std::io::{stderr, Write};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use sysinfo::System;
use tokio::time::{timeout, Duration};

use slamflow::engine::{Scheduler, SchedulerSettings};
use slamflow::pipelines::slamseq::{build_topology, PipelineFlags};
use slamflow::Arguments;

use common::{refs, MockExecutor};


#[tokio::test]
async fn test_scheduler_stress() -> Result<()> {
    let sample_counts = vec![50, 200];
    let fork_limits = vec![4, 32];
    let flags = PipelineFlags::from_args(&Arguments::parse_from(["slamflow", "--read-length", "75"]))?;

    let mut sys = System::new_all();
    for n in &sample_counts {
        for forks in &fork_limits {
            eprintln!("Testing: Samples: {}, Forks: {}", n, forks);
            stderr().flush()?;

            let names: Vec<(String, String)> = (0..*n)
                .map(|i| (format!("S{:04}", i), format!("G{}", i % 7)))
                .collect();
            let samples: Vec<(&str, &str)> = names.iter().map(|(s, g)| (s.as_str(), g.as_str())).collect();
            let graph = build_topology(&flags, &refs(), &common::registry(&samples))?;

            let memory_before = {
                sys.refresh_memory();
                sys.used_memory()
            };
            let start = Instant::now();

            let executor = Arc::new(MockExecutor::new(0));
            let settings = SchedulerSettings {
                max_forks: *forks,
                heavy_forks: (*forks / 4).max(1),
                fail_fast: true,
                work_root: std::env::temp_dir().join("slamflow-stress"),
            };
            let report = timeout(Duration::from_secs(60), Scheduler::new(settings).run(graph, executor.clone()))
                .await??;

            let elapsed = start.elapsed().as_secs_f64();
            let memory_used = {
                sys.refresh_memory();
                sys.used_memory().saturating_sub(memory_before) / 1024 / 1024 // MB
            };
            eprintln!("Executions: {}, Time: {:.3}s, Memory: {} MB", executor.completed().len(), elapsed, memory_used);

            assert!(report.is_success());
            assert_eq!(report.completed("map"), *n);
            assert_eq!(report.completed("collapse"), *n);
            assert_eq!(report.completed("deseq2"), 7);
            assert_eq!(report.completed("summary"), 1);
            assert_eq!(report.completed("report"), 1);
            assert!(executor.peak() <= *forks);
        }
    }
    Ok(())
}

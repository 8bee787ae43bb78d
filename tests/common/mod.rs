#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;

use slamflow::engine::{Artifact, ResourceClass, Sample, SampleRegistry, StageExecutor, StageRecord, StageSpec};
use slamflow::utils::reference::{Annotation, ReferenceBundle};


/// Stands in for the external tools: sleeps, then reports one fake file per declared output slot.
/// Tracks peak concurrency and every completed (stage, record) pair in completion order.
pub struct MockExecutor {
    delay: Duration,
    fail: Vec<(&'static str, String)>,
    running: AtomicUsize,
    peak: AtomicUsize,
    heavy_running: AtomicUsize,
    heavy_peak: AtomicUsize,
    completed: Mutex<Vec<(String, StageRecord)>>,
}

impl MockExecutor {
    pub fn new(delay_ms: u64) -> Self {
        MockExecutor {
            delay: Duration::from_millis(delay_ms),
            fail: Vec::new(),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            heavy_running: AtomicUsize::new(0),
            heavy_peak: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Makes `stage` fail for the record keyed `key`.
    pub fn failing(mut self, stage: &'static str, key: &str) -> Self {
        self.fail.push((stage, key.to_string()));
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn heavy_peak(&self) -> usize {
        self.heavy_peak.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<(String, StageRecord)> {
        self.completed.lock().unwrap().clone()
    }

    pub fn records_for(&self, stage: &str) -> Vec<StageRecord> {
        self.completed()
            .into_iter()
            .filter(|(s, _)| s == stage)
            .map(|(_, r)| r)
            .collect()
    }

    /// Position of the first completion of `stage` for `key`, in completion order.
    pub fn position(&self, stage: &str, key: &str) -> Option<usize> {
        self.completed()
            .iter()
            .position(|(s, r)| s == stage && r.key().to_string() == key)
    }
}

impl StageExecutor for MockExecutor {
    fn execute<'a>(
        &'a self,
        stage: &'a StageSpec,
        record: &'a StageRecord,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<(&'static str, Artifact)>>> {
        Box::pin(async move {
            let heavy = stage.class == ResourceClass::Heavy;
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if heavy {
                let now = self.heavy_running.fetch_add(1, Ordering::SeqCst) + 1;
                self.heavy_peak.fetch_max(now, Ordering::SeqCst);
            }

            tokio::time::sleep(self.delay).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            if heavy {
                self.heavy_running.fetch_sub(1, Ordering::SeqCst);
            }

            let key = record.key().to_string();
            if self.fail.iter().any(|(s, k)| *s == stage.name && *k == key) {
                return Err(anyhow!("{} exited with status 1 for {}", stage.tool, key));
            }

            self.completed.lock().unwrap().push((stage.name.to_string(), record.clone()));
            Ok(stage
                .produces
                .iter()
                .map(|slot| (*slot, Artifact::Present(work_dir.join(format!("{}_{}", key, slot)))))
                .collect())
        })
    }
}


pub fn registry(samples: &[(&str, &str)]) -> SampleRegistry {
    SampleRegistry::new(
        samples
            .iter()
            .map(|(name, group)| Sample {
                name: name.to_string(),
                reads: PathBuf::from(format!("/data/{}.fq.gz", name)),
                sample_type: "pulse".to_string(),
                time: "0".to_string(),
                group: group.to_string(),
            })
            .collect(),
    )
        .unwrap()
}

pub fn refs() -> ReferenceBundle {
    ReferenceBundle {
        fasta: PathBuf::from("/ref/genome.fa"),
        annotation: Annotation::Bed(PathBuf::from("/ref/utr.bed")),
        mapping_bed: None,
        vcf: None,
    }
}

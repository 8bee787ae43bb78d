use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use fxhash::FxHashMap as HashMap;

use crate::config::defs::{PipelineError, READS_SLOT};
use crate::engine::record::{Artifact, StageRecord};
use crate::engine::stream::Stream;


/// One row of the design table. Immutable once registered; records share it through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: String,
    pub reads: PathBuf,
    pub sample_type: String,
    pub time: String,
    pub group: String,
}

/// Canonical per-sample metadata, parsed once at pipeline start.
#[derive(Debug, Clone, Default)]
pub struct SampleRegistry {
    samples: Vec<Arc<Sample>>,
    by_name: HashMap<String, usize>,
}

impl SampleRegistry {
    /// Registers samples in design-table order.
    ///
    /// # Arguments
    ///
    /// * `samples` - Parsed design rows.
    ///
    /// # Returns
    /// SampleRegistry, or InvalidDesign on an empty table, a duplicate name or a missing reads path.
    pub fn new(samples: Vec<Sample>) -> Result<Self, PipelineError> {
        if samples.is_empty() {
            return Err(PipelineError::InvalidDesign("design table has no samples".to_string()));
        }

        let mut registry = SampleRegistry::default();
        for sample in samples {
            if sample.name.trim().is_empty() {
                return Err(PipelineError::InvalidDesign("sample with empty name".to_string()));
            }
            if sample.reads.as_os_str().is_empty() {
                return Err(PipelineError::InvalidDesign(format!("sample {} has no reads path", sample.name)));
            }
            if registry.by_name.contains_key(&sample.name) {
                return Err(PipelineError::InvalidDesign(format!("duplicate sample name: {}", sample.name)));
            }
            registry.by_name.insert(sample.name.clone(), registry.samples.len());
            registry.samples.push(Arc::new(sample));
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Sample>> {
        self.by_name.get(name).map(|&i| &self.samples[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Sample>> {
        self.samples.iter()
    }

    /// Group key of a sample, looked up from the design table.
    pub fn group_of(&self, name: &str) -> Option<&str> {
        self.get(name).map(|s| s.group.as_str())
    }

    /// Number of samples per group, ordered by group name.
    pub fn group_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for sample in &self.samples {
            *sizes.entry(sample.group.clone()).or_insert(0) += 1;
        }
        sizes
    }

    /// Seeds the initial stream of sample descriptors, one record per sample carrying its raw reads.
    pub fn seed_stream(&self, name: &str) -> Stream<StageRecord> {
        let records = self
            .samples
            .iter()
            .map(|s| {
                StageRecord::for_sample(s.clone())
                    .with_artifact(READS_SLOT, Artifact::Present(s.reads.clone()))
            })
            .collect();
        Stream::closed_with(name, records)
    }
}

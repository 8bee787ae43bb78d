use std::path::Path;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;

use crate::engine::record::{Artifact, StageRecord};
use crate::engine::stream::{Emitter, Stream, Subscription};


/// Concurrency class a stage is scheduled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceClass {
    Light,
    Heavy,
}

/// Static description of one stage: the tool it wraps, the slots it needs on every input record
/// and the slots it adds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: &'static str,
    pub tool: &'static str,
    pub class: ResourceClass,
    pub requires: Vec<&'static str>,
    pub produces: Vec<&'static str>,
}

impl StageSpec {
    /// A record is ready when every required slot is present. Optional inputs count as present when they
    /// carry the `Absent` placeholder.
    pub fn check_ready(&self, record: &StageRecord) -> Result<()> {
        let missing: Vec<&str> = self
            .requires
            .iter()
            .copied()
            .filter(|slot| !record.has_slot(slot))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("record {} is missing input slot(s): {}", record.key(), missing.join(", ")))
        }
    }

    /// Checks the executor returned exactly the declared slots, then attaches them to the record.
    pub fn attach_outputs(&self, record: StageRecord, outputs: Vec<(&'static str, Artifact)>) -> Result<StageRecord> {
        for slot in &self.produces {
            if !outputs.iter().any(|(s, _)| s == slot) {
                return Err(anyhow!("{} did not produce output slot {}", self.name, slot));
            }
        }
        Ok(outputs
            .into_iter()
            .fold(record, |rec, (slot, artifact)| rec.with_artifact(slot, artifact)))
    }
}


/// Runs the external computation behind a stage for one record.
pub trait StageExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        stage: &'a StageSpec,
        record: &'a StageRecord,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<(&'static str, Artifact)>>>;
}


/// One DAG node: a single input stream of ready records and one or more output streams.
pub struct StageNode {
    pub spec: StageSpec,
    pub(crate) input: Subscription<StageRecord>,
    pub(crate) outputs: Vec<Emitter<StageRecord>>,
}

impl StageNode {
    pub fn new(spec: StageSpec, input: &Stream<StageRecord>, outputs: &[&Stream<StageRecord>]) -> Self {
        StageNode {
            spec,
            input: input.subscribe(),
            outputs: outputs.iter().map(|s| s.emitter()).collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn input_name(&self) -> &str {
        self.input.name()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|e| e.stream_name().to_string()).collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::RecordKey;

    fn spec() -> StageSpec {
        StageSpec {
            name: "count",
            tool: "slamdunk",
            class: ResourceClass::Light,
            requires: vec!["filtered_bam", "vcf"],
            produces: vec!["tcount"],
        }
    }

    #[test]
    fn test_absent_placeholder_satisfies_readiness() {
        let record = StageRecord::keyed(RecordKey::Sample("A".to_string()))
            .with_artifact("filtered_bam", Artifact::Present("a.bam".into()))
            .with_artifact("vcf", Artifact::Absent);
        assert!(spec().check_ready(&record).is_ok());
    }

    #[test]
    fn test_missing_slot_is_not_ready() {
        let record = StageRecord::keyed(RecordKey::Sample("A".to_string()))
            .with_artifact("filtered_bam", Artifact::Present("a.bam".into()));
        let err = spec().check_ready(&record).unwrap_err();
        assert!(err.to_string().contains("vcf"));
    }

    #[test]
    fn test_attach_outputs_requires_declared_slots() {
        let record = StageRecord::keyed(RecordKey::Sample("A".to_string()));
        assert!(spec().attach_outputs(record.clone(), vec![]).is_err());
        let out = spec()
            .attach_outputs(record, vec![("tcount", Artifact::Present("a_tcount.tsv".into()))])
            .unwrap();
        assert!(out.has_slot("tcount"));
    }
}

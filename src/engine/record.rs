use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::registry::Sample;


/// An artifact slot value. `Absent` is the designed placeholder for an optional input that was not supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Present(PathBuf),
    Absent,
}

impl Artifact {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Artifact::Present(p) => Some(p.as_path()),
            Artifact::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Artifact::Absent)
    }
}

impl From<Option<PathBuf>> for Artifact {
    fn from(path: Option<PathBuf>) -> Self {
        match path {
            Some(p) => Artifact::Present(p),
            None => Artifact::Absent,
        }
    }
}


/// Key a record travels under: a sample name, a group key for aggregation, or the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Sample(String),
    Group(String),
    All,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Sample(name) => write!(f, "{}", name),
            RecordKey::Group(group) => write!(f, "group_{}", group),
            RecordKey::All => write!(f, "all"),
        }
    }
}


/// Anything that travels under a key through the combinators.
pub trait Keyed {
    type Key: Clone + Eq + std::hash::Hash + Ord + fmt::Display + Send + Sync + 'static;

    fn key(&self) -> &Self::Key;
}


/// The unit flowing on a stream. The key is fixed at creation; named artifact slots accumulate as the record
/// passes through stages.
#[derive(Debug, Clone)]
pub struct StageRecord {
    key: RecordKey,
    samples: Vec<Arc<Sample>>,
    artifacts: BTreeMap<String, Vec<Artifact>>,
}

impl StageRecord {
    pub fn for_sample(sample: Arc<Sample>) -> Self {
        StageRecord {
            key: RecordKey::Sample(sample.name.clone()),
            samples: vec![sample],
            artifacts: BTreeMap::new(),
        }
    }

    /// Record with no sample attached, e.g. a reference value.
    pub fn keyed(key: RecordKey) -> Self {
        StageRecord {
            key,
            samples: Vec::new(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Folds many records into one under `key`. Members are ordered by key, slots are concatenated in that
    /// order and samples are deduplicated by name.
    pub fn collected(key: RecordKey, mut members: Vec<StageRecord>) -> Self {
        members.sort_by(|a, b| a.key.cmp(&b.key));
        let mut record = StageRecord::keyed(key);
        for member in members {
            for sample in member.samples {
                if !record.samples.iter().any(|s| s.name == sample.name) {
                    record.samples.push(sample);
                }
            }
            for (slot, values) in member.artifacts {
                record.artifacts.entry(slot).or_default().extend(values);
            }
        }
        record
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn samples(&self) -> &[Arc<Sample>] {
        &self.samples
    }

    /// The sample behind a per-sample record.
    pub fn sample(&self) -> Option<&Arc<Sample>> {
        match self.key {
            RecordKey::Sample(_) => self.samples.first(),
            _ => None,
        }
    }

    /// Sets a slot to a single value.
    pub fn with_artifact(mut self, slot: &str, artifact: Artifact) -> Self {
        self.artifacts.insert(slot.to_string(), vec![artifact]);
        self
    }

    pub fn artifact(&self, slot: &str) -> Option<&Artifact> {
        self.artifacts.get(slot).and_then(|v| v.first())
    }

    pub fn artifacts(&self, slot: &str) -> &[Artifact] {
        self.artifacts.get(slot).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Present paths of a slot, skipping placeholders.
    pub fn paths(&self, slot: &str) -> Vec<&Path> {
        self.artifacts(slot).iter().filter_map(|a| a.path()).collect()
    }

    pub fn has_slot(&self, slot: &str) -> bool {
        self.artifacts.contains_key(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(|s| s.as_str())
    }

    /// Copies the listed slots of `other` into this record under new names. Used by broadcast-cross.
    pub fn absorb(mut self, other: &StageRecord, slots: &[(&str, &str)]) -> Self {
        for (from, to) in slots {
            if let Some(values) = other.artifacts.get(*from) {
                self.artifacts.insert(to.to_string(), values.clone());
            }
        }
        self
    }

    /// Merges the other side of a key-join. Slots already present here win.
    pub fn merge(mut self, other: StageRecord) -> Self {
        for (slot, values) in other.artifacts {
            self.artifacts.entry(slot).or_insert(values);
        }
        for sample in other.samples {
            if !self.samples.iter().any(|s| s.name == sample.name) {
                self.samples.push(sample);
            }
        }
        self
    }
}

impl Keyed for StageRecord {
    type Key = RecordKey;

    fn key(&self) -> &RecordKey {
        &self.key
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Arc<Sample> {
        Arc::new(Sample {
            name: name.to_string(),
            reads: PathBuf::from(format!("{}.fq", name)),
            sample_type: "pulse".to_string(),
            time: "0".to_string(),
            group: "G1".to_string(),
        })
    }

    #[test]
    fn test_collected_orders_members_by_key() {
        let b = StageRecord::for_sample(sample("B")).with_artifact("bam", Artifact::Present("b.bam".into()));
        let a = StageRecord::for_sample(sample("A")).with_artifact("bam", Artifact::Present("a.bam".into()));
        let all = StageRecord::collected(RecordKey::All, vec![b, a]);
        assert_eq!(all.key(), &RecordKey::All);
        assert_eq!(all.paths("bam"), vec![Path::new("a.bam"), Path::new("b.bam")]);
        assert_eq!(all.samples().len(), 2);
        assert!(all.sample().is_none());
    }

    #[test]
    fn test_merge_keeps_key_and_left_slots() {
        let left = StageRecord::for_sample(sample("A")).with_artifact("bam", Artifact::Present("left.bam".into()));
        let right = StageRecord::for_sample(sample("A"))
            .with_artifact("bam", Artifact::Present("right.bam".into()))
            .with_artifact("vcf", Artifact::Absent);
        let joined = left.merge(right);
        assert_eq!(joined.key().to_string(), "A");
        assert_eq!(joined.paths("bam"), vec![Path::new("left.bam")]);
        assert_eq!(joined.artifact("vcf"), Some(&Artifact::Absent));
        assert_eq!(joined.samples().len(), 1);
    }

    #[test]
    fn test_absorb_renames_slots() {
        let reference = StageRecord::keyed(RecordKey::All).with_artifact("bed", Artifact::Present("utr.bed".into()));
        let rec = StageRecord::for_sample(sample("A")).absorb(&reference, &[("bed", "mapping_bed")]);
        assert!(!rec.has_slot("bed"));
        assert_eq!(rec.paths("mapping_bed"), vec![Path::new("utr.bed")]);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(RecordKey::Group("G1".to_string()).to_string(), "group_G1");
        assert_eq!(RecordKey::All.to_string(), "all");
    }
}

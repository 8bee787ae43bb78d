use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use log::{debug, info};

use crate::cli::Arguments;
use crate::config::defs::{
    AlleyoopSubcommand, PipelineError, RunConfig, SlamdunkSubcommand, BAM_SLOT, BED_SLOT, COLLAPSED_SLOT,
    COUNT_SLOT, FASTA_SLOT, FILTERED_SLOT, GTF_SLOT, MAPPING_BED_SLOT, READS_SLOT, STATS_SLOTS, TRIMMED_SLOT,
    VCF_SLOT,
};
use crate::engine::{Artifact, RecordKey, StageExecutor, StageRecord, StageSpec};
use crate::pipelines::slamseq::StageKind;
use crate::utils::command::alleyoop::{self, AlleyoopConfig};
use crate::utils::command::slamdunk::{self, SlamdunkConfig};
use crate::utils::command::{deseq2, multiqc, run_tool, trim_galore, ToolInvocation};
use crate::utils::file::extension_remover;


/// A tool call for one record plus the files it must leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub invocation: ToolInvocation,
    pub outputs: Vec<(&'static str, PathBuf)>,
}


fn required<'r>(record: &'r StageRecord, slot: &str) -> Result<&'r Path> {
    record
        .artifact(slot)
        .and_then(|a| a.path())
        .ok_or_else(|| anyhow!("{} has no {} file", record.key(), slot))
}

fn optional<'r>(record: &'r StageRecord, slot: &str) -> Option<&'r Path> {
    record.artifact(slot).and_then(|a| a.path())
}

fn slamdunk_call(
    args: &Arguments,
    kind: StageKind,
    subcommand: SlamdunkSubcommand,
    config: SlamdunkConfig,
    work_dir: &Path,
) -> Plan {
    let output = slamdunk::expected_output(subcommand, config.input, work_dir);
    Plan {
        invocation: ToolInvocation::new(kind.tool(), slamdunk::arg_generator(args, &config, work_dir)),
        outputs: vec![(kind.produces(), output)],
    }
}

fn alleyoop_call(
    args: &Arguments,
    kind: StageKind,
    subcommand: AlleyoopSubcommand,
    record: &StageRecord,
    input_slot: &str,
    work_dir: &Path,
) -> Result<Plan> {
    let input = required(record, input_slot)?;
    let uses_bed = matches!(subcommand, AlleyoopSubcommand::Utrrates | AlleyoopSubcommand::Tcperutrpos);
    let uses_vcf = matches!(subcommand, AlleyoopSubcommand::Tcperreadpos | AlleyoopSubcommand::Tcperutrpos);
    let uses_fasta = subcommand != AlleyoopSubcommand::Collapse;
    let config = AlleyoopConfig {
        subcommand,
        inputs: vec![input],
        fasta: if uses_fasta { Some(required(record, FASTA_SLOT)?) } else { None },
        bed: if uses_bed { Some(required(record, BED_SLOT)?) } else { None },
        vcf: if uses_vcf { optional(record, VCF_SLOT) } else { None },
    };
    Ok(Plan {
        invocation: ToolInvocation::new(kind.tool(), alleyoop::arg_generator(args, &config, work_dir)),
        outputs: vec![(kind.produces(), alleyoop::expected_output(subcommand, input, work_dir))],
    })
}


/// Per-sample outputs live under `<work_dir>/<sample>/` so that samples whose reads share a file name
/// never write to the same path. Group and run-wide records write straight into `work_dir`.
pub fn output_dir(record: &StageRecord, work_dir: &Path) -> PathBuf {
    match record.key() {
        RecordKey::Sample(name) => work_dir.join(name),
        RecordKey::Group(_) | RecordKey::All => work_dir.to_path_buf(),
    }
}


/// Turns one ready record into a concrete tool invocation. Pure: nothing is spawned or created here.
///
/// # Arguments
///
/// * `kind` - Stage being executed.
/// * `args` - Run configuration values.
/// * `record` - The ready input record.
/// * `work_dir` - `<out>/<stage>` directory for the outputs.
///
/// # Returns
/// Plan with the invocation and expected output files.
pub fn plan_invocation(kind: StageKind, args: &Arguments, record: &StageRecord, work_dir: &Path) -> Result<Plan> {
    let out_dir = output_dir(record, work_dir);
    let work_dir = out_dir.as_path();
    match kind {
        StageKind::Gtf2Bed => {
            let gtf = required(record, GTF_SLOT)?;
            let bed = work_dir.join(format!("{}.bed", extension_remover(gtf)));
            let mut invocation = ToolInvocation::new(kind.tool(), Vec::new());
            invocation.stdin_from = Some(gtf.to_path_buf());
            invocation.stdout_to = Some(bed.clone());
            Ok(Plan { invocation, outputs: vec![(kind.produces(), bed)] })
        }
        StageKind::Trim => {
            let reads = required(record, READS_SLOT)?;
            Ok(Plan {
                invocation: ToolInvocation::new(kind.tool(), trim_galore::arg_generator(args, reads, work_dir)),
                outputs: vec![(kind.produces(), trim_galore::expected_output(reads, work_dir))],
            })
        }
        StageKind::Map => {
            let reads = match optional(record, TRIMMED_SLOT) {
                Some(trimmed) => trimmed,
                None => required(record, READS_SLOT)?,
            };
            let sample = record
                .sample()
                .ok_or_else(|| anyhow!("map expects a per-sample record, got {}", record.key()))?;
            let config = SlamdunkConfig {
                subcommand: SlamdunkSubcommand::Map,
                input: reads,
                fasta: Some(required(record, FASTA_SLOT)?),
                bed: None,
                vcf: None,
                sample: Some(sample.as_ref()),
            };
            Ok(slamdunk_call(args, kind, SlamdunkSubcommand::Map, config, work_dir))
        }
        StageKind::Filter => {
            let config = SlamdunkConfig {
                subcommand: SlamdunkSubcommand::Filter,
                input: required(record, BAM_SLOT)?,
                fasta: None,
                bed: optional(record, MAPPING_BED_SLOT),
                vcf: None,
                sample: None,
            };
            Ok(slamdunk_call(args, kind, SlamdunkSubcommand::Filter, config, work_dir))
        }
        StageKind::Snp => {
            let config = SlamdunkConfig {
                subcommand: SlamdunkSubcommand::Snp,
                input: required(record, FILTERED_SLOT)?,
                fasta: Some(required(record, FASTA_SLOT)?),
                bed: None,
                vcf: None,
                sample: None,
            };
            Ok(slamdunk_call(args, kind, SlamdunkSubcommand::Snp, config, work_dir))
        }
        StageKind::Count => {
            let config = SlamdunkConfig {
                subcommand: SlamdunkSubcommand::Count,
                input: required(record, FILTERED_SLOT)?,
                fasta: Some(required(record, FASTA_SLOT)?),
                bed: Some(required(record, BED_SLOT)?),
                vcf: optional(record, VCF_SLOT),
                sample: None,
            };
            Ok(slamdunk_call(args, kind, SlamdunkSubcommand::Count, config, work_dir))
        }
        StageKind::Collapse => alleyoop_call(args, kind, AlleyoopSubcommand::Collapse, record, COUNT_SLOT, work_dir),
        StageKind::Rates => alleyoop_call(args, kind, AlleyoopSubcommand::Rates, record, FILTERED_SLOT, work_dir),
        StageKind::UtrRates => alleyoop_call(args, kind, AlleyoopSubcommand::Utrrates, record, FILTERED_SLOT, work_dir),
        StageKind::TcPerReadPos => {
            alleyoop_call(args, kind, AlleyoopSubcommand::Tcperreadpos, record, FILTERED_SLOT, work_dir)
        }
        StageKind::TcPerUtrPos => {
            alleyoop_call(args, kind, AlleyoopSubcommand::Tcperutrpos, record, FILTERED_SLOT, work_dir)
        }
        StageKind::Summary => {
            let bams = record.paths(FILTERED_SLOT);
            if bams.is_empty() {
                return Err(anyhow!("summary received no filtered alignments"));
            }
            let output = alleyoop::expected_output(AlleyoopSubcommand::Summary, bams[0], work_dir);
            let config = AlleyoopConfig {
                subcommand: AlleyoopSubcommand::Summary,
                inputs: bams,
                fasta: None,
                bed: None,
                vcf: None,
            };
            Ok(Plan {
                invocation: ToolInvocation::new(kind.tool(), alleyoop::arg_generator(args, &config, &output)),
                outputs: vec![(kind.produces(), output)],
            })
        }
        StageKind::Deseq2 => {
            let group = match record.key() {
                RecordKey::Group(group) => group.as_str(),
                other => return Err(anyhow!("deseq2 expects a group record, got {}", other)),
            };
            let samples: Vec<_> = record.samples().iter().map(|s| s.as_ref()).collect();
            let collapsed = record.paths(COLLAPSED_SLOT);
            Ok(Plan {
                invocation: ToolInvocation::new(
                    kind.tool(),
                    deseq2::arg_generator(args, group, &samples, &collapsed, work_dir),
                ),
                outputs: vec![(kind.produces(), deseq2::expected_output(group, work_dir))],
            })
        }
        StageKind::Report => {
            let tables: Vec<&Path> = STATS_SLOTS.iter().flat_map(|slot| record.paths(slot)).collect();
            Ok(Plan {
                invocation: ToolInvocation::new(kind.tool(), multiqc::arg_generator(&tables, work_dir)),
                outputs: vec![(kind.produces(), multiqc::expected_output(work_dir))],
            })
        }
    }
}


/// Runs each stage as an external process under `<out>/<stage>/`, one subdirectory per sample.
pub struct CommandExecutor {
    config: Arc<RunConfig>,
}

impl CommandExecutor {
    pub fn new(config: Arc<RunConfig>) -> Self {
        CommandExecutor { config }
    }
}

impl StageExecutor for CommandExecutor {
    fn execute<'a>(
        &'a self,
        stage: &'a StageSpec,
        record: &'a StageRecord,
        work_dir: &'a Path,
    ) -> BoxFuture<'a, Result<Vec<(&'static str, Artifact)>>> {
        Box::pin(async move {
            let kind = StageKind::from_name(stage.name).ok_or_else(|| anyhow!("Unknown stage {}", stage.name))?;
            let out_dir = output_dir(record, work_dir);
            tokio::fs::create_dir_all(&out_dir)
                .await
                .map_err(|e| anyhow!("Failed to create {}: {}", out_dir.display(), e))?;

            let plan = plan_invocation(kind, &self.config.args, record, work_dir)?;
            info!("Running {} for {}", stage.name, record.key());
            run_tool(&plan.invocation).await.map_err(|e| PipelineError::ToolExecution {
                tool: plan.invocation.tool.to_string(),
                error: e.to_string(),
            })?;

            let mut outputs = Vec::with_capacity(plan.outputs.len());
            for (slot, path) in plan.outputs {
                if !path.exists() {
                    return Err(anyhow!("{} finished but {} was not written", stage.name, path.display()));
                }
                debug!("{} [{}] -> {}", stage.name, record.key(), path.display());
                outputs.push((slot, Artifact::Present(path)));
            }
            Ok(outputs)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{SUMMARY_SLOT, RATES_SLOT};
    use crate::engine::registry::Sample;
    use clap::Parser;

    fn args() -> Arguments {
        Arguments::parse_from(["slamflow", "--read-length", "50"])
    }

    fn sample(name: &str, group: &str) -> Arc<Sample> {
        Arc::new(Sample {
            name: name.to_string(),
            reads: PathBuf::from(format!("/data/{}.fq.gz", name)),
            sample_type: "chase".to_string(),
            time: "30".to_string(),
            group: group.to_string(),
        })
    }

    fn present(path: &str) -> Artifact {
        Artifact::Present(PathBuf::from(path))
    }

    #[test]
    fn test_map_prefers_trimmed_reads() -> Result<()> {
        let record = StageRecord::for_sample(sample("A", "G1"))
            .with_artifact(READS_SLOT, present("/data/A.fq.gz"))
            .with_artifact(TRIMMED_SLOT, present("/out/trim/A_trimmed.fq.gz"))
            .with_artifact(FASTA_SLOT, present("/ref/genome.fa"));
        let plan = plan_invocation(StageKind::Map, &args(), &record, Path::new("/out/map"))?;
        assert_eq!(plan.invocation.tool, "slamdunk");
        assert_eq!(plan.invocation.args.last().map(|s| s.as_str()), Some("/out/trim/A_trimmed.fq.gz"));
        assert!(plan.invocation.args.windows(2).any(|w| w[0] == "-sy" && w[1] == "chase"));
        assert_eq!(plan.outputs, vec![(BAM_SLOT, PathBuf::from("/out/map/A/A_trimmed_slamdunk_mapped.bam"))]);
        Ok(())
    }

    #[test]
    fn test_filter_without_mapping_bed() -> Result<()> {
        let record = StageRecord::for_sample(sample("A", "G1"))
            .with_artifact(BAM_SLOT, present("/out/map/A_slamdunk_mapped.bam"))
            .with_artifact(MAPPING_BED_SLOT, Artifact::Absent);
        let plan = plan_invocation(StageKind::Filter, &args(), &record, Path::new("/out/filter"))?;
        assert!(!plan.invocation.args.contains(&"-b".to_string()));
        Ok(())
    }

    #[test]
    fn test_count_requires_bed() {
        let record = StageRecord::for_sample(sample("A", "G1"))
            .with_artifact(FILTERED_SLOT, present("/out/filter/A_filtered.bam"))
            .with_artifact(FASTA_SLOT, present("/ref/genome.fa"))
            .with_artifact(VCF_SLOT, Artifact::Absent);
        assert!(plan_invocation(StageKind::Count, &args(), &record, Path::new("/out/count")).is_err());
    }

    #[test]
    fn test_deseq2_plans_whole_group() -> Result<()> {
        let a = StageRecord::for_sample(sample("A", "G1")).with_artifact(COLLAPSED_SLOT, present("/c/A.csv"));
        let b = StageRecord::for_sample(sample("B", "G1")).with_artifact(COLLAPSED_SLOT, present("/c/B.csv"));
        let group = StageRecord::collected(RecordKey::Group("G1".to_string()), vec![b, a]);
        let plan = plan_invocation(StageKind::Deseq2, &args(), &group, Path::new("/out/deseq2"))?;
        let argv = &plan.invocation.args;
        assert!(argv.windows(2).any(|w| w[0] == "--samples" && w[1] == "A,B"));
        assert_eq!(&argv[argv.len() - 2..], &["/c/A.csv".to_string(), "/c/B.csv".to_string()]);
        assert_eq!(plan.outputs[0].1, PathBuf::from("/out/deseq2/G1_deseq2.tsv"));
        Ok(())
    }

    #[test]
    fn test_report_gathers_every_table() -> Result<()> {
        let a = StageRecord::for_sample(sample("A", "G1")).with_artifact(RATES_SLOT, present("/r/A_rates.csv"));
        let s = StageRecord::keyed(RecordKey::All).with_artifact(SUMMARY_SLOT, present("/s/summary.txt"));
        let all = StageRecord::collected(RecordKey::All, vec![a, s]);
        let plan = plan_invocation(StageKind::Report, &args(), &all, Path::new("/out/report"))?;
        assert!(plan.invocation.args.contains(&"/r/A_rates.csv".to_string()));
        assert!(plan.invocation.args.contains(&"/s/summary.txt".to_string()));
        Ok(())
    }

    #[test]
    fn test_gtf2bed_redirects() -> Result<()> {
        let record = StageRecord::keyed(RecordKey::All).with_artifact(GTF_SLOT, present("/ref/genes.gtf"));
        let plan = plan_invocation(StageKind::Gtf2Bed, &args(), &record, Path::new("/out/gtf2bed"))?;
        assert_eq!(plan.invocation.stdin_from, Some(PathBuf::from("/ref/genes.gtf")));
        assert_eq!(plan.invocation.stdout_to, Some(PathBuf::from("/out/gtf2bed/genes.bed")));
        Ok(())
    }

    #[test]
    fn test_shared_reads_name_keeps_outputs_apart() -> Result<()> {
        let trim = |name: &str, reads: &str| -> Result<Plan> {
            let record = StageRecord::for_sample(sample(name, "G1")).with_artifact(READS_SLOT, present(reads));
            plan_invocation(StageKind::Trim, &args(), &record, Path::new("/out/trim"))
        };
        let a = trim("A", "/s1/reads.fq.gz")?;
        let b = trim("B", "/s2/reads.fq.gz")?;
        assert_eq!(a.outputs[0].1, PathBuf::from("/out/trim/A/reads_trimmed.fq.gz"));
        assert_eq!(b.outputs[0].1, PathBuf::from("/out/trim/B/reads_trimmed.fq.gz"));
        assert!(a.invocation.args.windows(2).any(|w| w[0] == "-o" && w[1] == "/out/trim/A"));

        let map = |name: &str, trimmed: &Path| -> Result<Plan> {
            let record = StageRecord::for_sample(sample(name, "G1"))
                .with_artifact(TRIMMED_SLOT, Artifact::Present(trimmed.to_path_buf()))
                .with_artifact(FASTA_SLOT, present("/ref/genome.fa"));
            plan_invocation(StageKind::Map, &args(), &record, Path::new("/out/map"))
        };
        let a_bam = map("A", &a.outputs[0].1)?.outputs[0].1.clone();
        let b_bam = map("B", &b.outputs[0].1)?.outputs[0].1.clone();
        assert_ne!(a_bam, b_bam);
        assert_eq!(a_bam, PathBuf::from("/out/map/A/reads_trimmed_slamdunk_mapped.bam"));
        Ok(())
    }

    #[test]
    fn test_group_outputs_stay_in_stage_dir() {
        let group = StageRecord::keyed(RecordKey::Group("G1".to_string()));
        assert_eq!(output_dir(&group, Path::new("/out/deseq2")), PathBuf::from("/out/deseq2"));
        let all = StageRecord::keyed(RecordKey::All);
        assert_eq!(output_dir(&all, Path::new("/out/report")), PathBuf::from("/out/report"));
    }
}

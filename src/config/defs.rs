use std::path::PathBuf;
use crate::cli::{Arguments, ErrorStrategy};
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

// External software
pub const GZIP_EXT: &str = "gz";
pub const TRIM_GALORE_TAG: &str = "trim_galore";
pub const SLAMDUNK_TAG: &str = "slamdunk";
pub const ALLEYOOP_TAG: &str = "alleyoop";
pub const GTF2BED_TAG: &str = "gtf2bed";
pub const DESEQ2_TAG: &str = "deseq2_slamseq.r";
pub const MULTIQC_TAG: &str = "multiqc";


lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(TRIM_GALORE_TAG, 0.6);
        m.insert(SLAMDUNK_TAG, 0.4);
        m.insert(ALLEYOOP_TAG, 0.4);
        m.insert(MULTIQC_TAG, 1.9);

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlamdunkSubcommand {
    Map,
    Filter,
    Snp,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlleyoopSubcommand {
    Collapse,
    Rates,
    Utrrates,
    Tcperreadpos,
    Tcperutrpos,
    Summary,
}

// Artifact slot names carried on stage records
pub const READS_SLOT: &str = "reads";
pub const TRIMMED_SLOT: &str = "trimmed_reads";
pub const FASTA_SLOT: &str = "fasta";
pub const BED_SLOT: &str = "bed";
pub const MAPPING_BED_SLOT: &str = "mapping_bed";
pub const GTF_SLOT: &str = "gtf";
pub const BAM_SLOT: &str = "bam";
pub const FILTERED_SLOT: &str = "filtered_bam";
pub const VCF_SLOT: &str = "vcf";
pub const COUNT_SLOT: &str = "tcount";
pub const COLLAPSED_SLOT: &str = "collapsed";
pub const RATES_SLOT: &str = "rates";
pub const UTRRATES_SLOT: &str = "utrrates";
pub const TCREADPOS_SLOT: &str = "tcperreadpos";
pub const TCUTRPOS_SLOT: &str = "tcperutrpos";
pub const SUMMARY_SLOT: &str = "summary";
pub const DESEQ2_SLOT: &str = "deseq2";
pub const REPORT_SLOT: &str = "report";
pub const STATS_SLOTS: &[&str] = &[RATES_SLOT, UTRRATES_SLOT, TCREADPOS_SLOT, TCUTRPOS_SLOT, SUMMARY_SLOT];

// Static Parameters
pub const TRIM_STRINGENCY: usize = 3;
pub const MULTIMAPPER_TOPN: usize = 100;
pub const DESIGN_NAME_COL: &str = "name";
pub const DESIGN_READS_COL: &str = "reads";
pub const DESIGN_TYPE_COL: &str = "type";
pub const DESIGN_TIME_COL: &str = "time";
pub const DESIGN_GROUP_COL: &str = "group";
pub const DEFAULT_SAMPLE_TYPE: &str = "pulse";
pub const DEFAULT_SAMPLE_TIME: &str = "0";


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing mandatory parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid design table: {0}")]
    InvalidDesign(String),

    #[error("Tool execution failed: {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Stage {stage} failed for {key}: {error}")]
    StageFailed { stage: String, key: String, error: String },

    #[error("Barrier {barrier} starved: expected {expected} records, received {received}")]
    BarrierStarved { barrier: String, expected: usize, received: usize },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}


pub struct RunConfig  {
    pub cwd: PathBuf,
    pub out_dir: PathBuf,
    pub args: Arguments,
    pub max_forks: usize,
    pub heavy_forks: usize,
}

impl RunConfig {
    /// Builds a RunConfig from parsed arguments.
    /// Concurrency limits are clamped to at least one slot; the heavy class never exceeds the global bound.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments.
    /// * `cwd` - Working directory that relative paths are resolved against.
    /// * `out_dir` - Directory all stage outputs are written under.
    /// * `default_forks` - Global bound used when `--max-forks` is absent.
    ///
    /// # Returns
    /// RunConfig
    pub fn new(args: Arguments, cwd: PathBuf, out_dir: PathBuf, default_forks: usize) -> Self {
        let max_forks = args.max_forks.unwrap_or(default_forks).max(1);
        let heavy_forks = args.heavy_forks.clamp(1, max_forks);
        RunConfig {
            cwd,
            out_dir,
            args,
            max_forks,
            heavy_forks,
        }
    }

    pub fn fail_fast(&self) -> bool {
        self.args.error_strategy == ErrorStrategy::Terminate
    }
}

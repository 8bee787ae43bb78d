use clap::{Parser, ValueEnum};

/// What the scheduler does when one key fails inside a stage.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum ErrorStrategy {
    /// Tear down every in-flight execution and stop the run.
    #[default]
    Terminate,
    /// Record the failure against the key and keep the other keys going.
    Ignore,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "slamflow", version, about = "SLAMseq dataflow pipeline")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'd', long, help = "Tab-separated design table with columns name, reads, type, time, group")]
    pub design: Option<String>,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. Defaults to 'slamflow_YYYYMMDD' in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(short = 'f', long)]
    pub fasta: Option<String>,

    #[arg(long, help = "3' UTR coordinates (BED). Takes precedence over --gtf")]
    pub bed: Option<String>,

    #[arg(long, help = "Gene annotation converted to a 3' UTR BED when --bed is not given")]
    pub gtf: Option<String>,

    #[arg(long, help = "Optional BED used for multimapper recovery; defaults to the 3' UTR BED")]
    pub mapping_bed: Option<String>,

    #[arg(long, help = "Known variants; skips internal SNP calling")]
    pub vcf: Option<String>,

    #[arg(long, default_value_t = 12)]
    pub trim5: usize,

    #[arg(long, default_value_t = 4)]
    pub polya: usize,

    #[arg(long, default_value_t = false)]
    pub multimappers: bool,

    #[arg(long, default_value_t = false)]
    pub quantseq: bool,

    #[arg(long, default_value_t = false)]
    pub endtoend: bool,

    #[arg(long, default_value_t = 2)]
    pub min_coverage: usize,

    #[arg(long, default_value_t = 0.8)]
    pub var_fraction: f64,

    #[arg(long, default_value_t = 1)]
    pub conversions: usize,

    #[arg(long, default_value_t = 27)]
    pub base_quality: u8,

    #[arg(long)]
    pub read_length: Option<usize>,

    #[arg(long, default_value_t = 0.05)]
    pub pvalue: f64,

    #[arg(long, default_value_t = false)]
    pub skip_trimming: bool,

    #[arg(long, default_value_t = false)]
    pub skip_deseq2: bool,

    #[arg(long, default_value_t = false, help = "Count conversions without SNP masking")]
    pub skip_snp: bool,

    #[arg(long, default_value_t = 8)]
    pub threads: usize,

    #[arg(long, help = "Maximum concurrent stage executions; defaults to physical cores divided by --threads")]
    pub max_forks: Option<usize>,

    #[arg(long, default_value_t = 2, help = "Maximum concurrent executions of heavy stages (mapping, SNP calling)")]
    pub heavy_forks: usize,

    #[arg(long, default_value = "terminate", value_enum)]
    pub error_strategy: ErrorStrategy,

    #[arg(long, default_value_t = false)]
    pub skip_tool_check: bool,
}

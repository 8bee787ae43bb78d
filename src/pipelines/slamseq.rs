/// SLAMseq stage catalog, gating and topology.

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, RunConfig, ALLEYOOP_TAG, BAM_SLOT, BED_SLOT, COLLAPSED_SLOT, COUNT_SLOT, DESEQ2_SLOT, DESEQ2_TAG,
    FASTA_SLOT, FILTERED_SLOT, GTF2BED_TAG, GTF_SLOT, MAPPING_BED_SLOT, MULTIQC_TAG, RATES_SLOT, READS_SLOT,
    REPORT_SLOT, SLAMDUNK_TAG, SUMMARY_SLOT, TCREADPOS_SLOT, TCUTRPOS_SLOT, TRIMMED_SLOT, TRIM_GALORE_TAG,
    UTRRATES_SLOT, VCF_SLOT,
};
use crate::engine::{
    Artifact, Graph, GraphBuilder, RecordKey, ResourceClass, RunReport, SampleRegistry, Scheduler,
    SchedulerSettings, StageRecord, StageSpec, Stream,
};
use crate::pipelines::executor::CommandExecutor;
use crate::utils::command::check_tools;
use crate::utils::design::load_design;
use crate::utils::file::resolve_path;
use crate::utils::reference::{Annotation, ReferenceBundle};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Gtf2Bed,
    Trim,
    Map,
    Filter,
    Snp,
    Count,
    Collapse,
    Rates,
    UtrRates,
    TcPerReadPos,
    TcPerUtrPos,
    Summary,
    Deseq2,
    Report,
}

pub const ALL_STAGES: [StageKind; 14] = [
    StageKind::Gtf2Bed,
    StageKind::Trim,
    StageKind::Map,
    StageKind::Filter,
    StageKind::Snp,
    StageKind::Count,
    StageKind::Collapse,
    StageKind::Rates,
    StageKind::UtrRates,
    StageKind::TcPerReadPos,
    StageKind::TcPerUtrPos,
    StageKind::Summary,
    StageKind::Deseq2,
    StageKind::Report,
];

/// Per-sample statistic stages whose tables feed the aggregate report.
pub const STAT_STAGES: [StageKind; 4] = [
    StageKind::Rates,
    StageKind::UtrRates,
    StageKind::TcPerReadPos,
    StageKind::TcPerUtrPos,
];

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Gtf2Bed => "gtf2bed",
            StageKind::Trim => "trim",
            StageKind::Map => "map",
            StageKind::Filter => "filter",
            StageKind::Snp => "snp",
            StageKind::Count => "count",
            StageKind::Collapse => "collapse",
            StageKind::Rates => "rates",
            StageKind::UtrRates => "utrrates",
            StageKind::TcPerReadPos => "tcperreadpos",
            StageKind::TcPerUtrPos => "tcperutrpos",
            StageKind::Summary => "summary",
            StageKind::Deseq2 => "deseq2",
            StageKind::Report => "report",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_STAGES.iter().copied().find(|k| k.name() == name)
    }

    pub fn tool(self) -> &'static str {
        match self {
            StageKind::Gtf2Bed => GTF2BED_TAG,
            StageKind::Trim => TRIM_GALORE_TAG,
            StageKind::Map | StageKind::Filter | StageKind::Snp | StageKind::Count => SLAMDUNK_TAG,
            StageKind::Collapse
            | StageKind::Rates
            | StageKind::UtrRates
            | StageKind::TcPerReadPos
            | StageKind::TcPerUtrPos
            | StageKind::Summary => ALLEYOOP_TAG,
            StageKind::Deseq2 => DESEQ2_TAG,
            StageKind::Report => MULTIQC_TAG,
        }
    }

    /// Alignment and variant calling hold most of a node's memory; they share the heavy pool.
    pub fn class(self) -> ResourceClass {
        match self {
            StageKind::Map | StageKind::Snp => ResourceClass::Heavy,
            _ => ResourceClass::Light,
        }
    }

    /// Slots a record must carry before the stage can run for it.
    pub fn requires(self) -> Vec<&'static str> {
        match self {
            StageKind::Gtf2Bed => vec![GTF_SLOT],
            StageKind::Trim => vec![READS_SLOT],
            StageKind::Map => vec![READS_SLOT, FASTA_SLOT],
            StageKind::Filter => vec![BAM_SLOT, MAPPING_BED_SLOT],
            StageKind::Snp => vec![FILTERED_SLOT, FASTA_SLOT],
            StageKind::Count => vec![FILTERED_SLOT, FASTA_SLOT, BED_SLOT, VCF_SLOT],
            StageKind::Collapse => vec![COUNT_SLOT],
            StageKind::Rates => vec![FILTERED_SLOT, FASTA_SLOT],
            StageKind::UtrRates => vec![FILTERED_SLOT, FASTA_SLOT, BED_SLOT],
            StageKind::TcPerReadPos => vec![FILTERED_SLOT, FASTA_SLOT, VCF_SLOT],
            StageKind::TcPerUtrPos => vec![FILTERED_SLOT, FASTA_SLOT, BED_SLOT, VCF_SLOT],
            StageKind::Summary => vec![FILTERED_SLOT],
            StageKind::Deseq2 => vec![COLLAPSED_SLOT],
            StageKind::Report => vec![SUMMARY_SLOT],
        }
    }

    pub fn produces(self) -> &'static str {
        match self {
            StageKind::Gtf2Bed => BED_SLOT,
            StageKind::Trim => TRIMMED_SLOT,
            StageKind::Map => BAM_SLOT,
            StageKind::Filter => FILTERED_SLOT,
            StageKind::Snp => VCF_SLOT,
            StageKind::Count => COUNT_SLOT,
            StageKind::Collapse => COLLAPSED_SLOT,
            StageKind::Rates => RATES_SLOT,
            StageKind::UtrRates => UTRRATES_SLOT,
            StageKind::TcPerReadPos => TCREADPOS_SLOT,
            StageKind::TcPerUtrPos => TCUTRPOS_SLOT,
            StageKind::Summary => SUMMARY_SLOT,
            StageKind::Deseq2 => DESEQ2_SLOT,
            StageKind::Report => REPORT_SLOT,
        }
    }

    pub fn spec(self) -> StageSpec {
        StageSpec {
            name: self.name(),
            tool: self.tool(),
            class: self.class(),
            requires: self.requires(),
            produces: vec![self.produces()],
        }
    }

    /// Gating predicate, evaluated once while the graph is built.
    pub fn enabled(self, flags: &PipelineFlags, refs: &ReferenceBundle) -> bool {
        let conversions = !flags.quantseq;
        match self {
            StageKind::Gtf2Bed => matches!(refs.annotation, Annotation::Gtf(_)),
            StageKind::Trim => !flags.skip_trimming,
            StageKind::Map | StageKind::Filter | StageKind::Summary | StageKind::Report => true,
            StageKind::Snp => conversions && refs.vcf.is_none() && !flags.skip_snp,
            StageKind::Count
            | StageKind::Collapse
            | StageKind::Rates
            | StageKind::UtrRates
            | StageKind::TcPerReadPos
            | StageKind::TcPerUtrPos => conversions,
            StageKind::Deseq2 => conversions && !flags.skip_deseq2,
        }
    }
}


/// The run-mode switches the topology depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFlags {
    pub skip_trimming: bool,
    pub quantseq: bool,
    pub skip_deseq2: bool,
    pub skip_snp: bool,
    pub multimappers: bool,
    pub read_length: usize,
}

impl PipelineFlags {
    pub fn from_args(args: &Arguments) -> Result<Self, PipelineError> {
        Ok(PipelineFlags {
            skip_trimming: args.skip_trimming,
            quantseq: args.quantseq,
            skip_deseq2: args.skip_deseq2,
            skip_snp: args.skip_snp,
            multimappers: args.multimappers,
            read_length: args.read_length.ok_or(PipelineError::MissingParameter("read_length"))?,
        })
    }
}


/// Checks every mandatory input before anything touches the filesystem. The first missing field is reported.
///
/// # Arguments
///
/// * `args` - Parsed command-line arguments.
/// * `cwd` - Directory relative paths are resolved against.
///
/// # Returns
/// The design table path, the unprepared reference bundle and the topology flags.
pub fn validate_args(
    args: &Arguments,
    cwd: &Path,
) -> Result<(std::path::PathBuf, ReferenceBundle, PipelineFlags), PipelineError> {
    let design = args
        .design
        .as_deref()
        .map(|d| resolve_path(d, cwd))
        .ok_or(PipelineError::MissingParameter("design (sample reads paths)"))?;
    let refs = ReferenceBundle::from_args(args, cwd)?;
    let flags = PipelineFlags::from_args(args)?;
    if refs.vcf.is_some() && flags.skip_snp {
        return Err(PipelineError::InvalidConfig(
            "--vcf supplies variant calls and --skip-snp discards them; pass only one".to_string(),
        ));
    }
    Ok((design, refs, flags))
}


fn reference_source(g: &mut GraphBuilder, name: &str, slot: &str, path: &Path) -> Stream<StageRecord> {
    g.source(Stream::closed_with(
        name,
        vec![StageRecord::keyed(RecordKey::All).with_artifact(slot, Artifact::Present(path.to_path_buf()))],
    ))
}


/// Wires the SLAMseq graph for one configuration. Only enabled stages are instantiated; where a stage is
/// elided its consumers read the stream it would have consumed.
///
/// # Arguments
///
/// * `flags` - Run-mode switches.
/// * `refs` - Prepared reference bundle.
/// * `registry` - Samples from the design table.
///
/// # Returns
/// Graph ready for the scheduler.
pub fn build_topology(
    flags: &PipelineFlags,
    refs: &ReferenceBundle,
    registry: &SampleRegistry,
) -> Result<Graph, PipelineError> {
    if registry.is_empty() {
        return Err(PipelineError::InvalidDesign("no samples".to_string()));
    }
    let on = |kind: StageKind| kind.enabled(flags, refs);
    let n_samples = registry.len();
    let mut g = GraphBuilder::new();

    let samples = g.source(registry.seed_stream("samples"));
    let fasta = reference_source(&mut g, "reference.fasta", FASTA_SLOT, &refs.fasta);

    // UTR bed, converted from the GTF when that is all we have
    let utr_bed = match &refs.annotation {
        Annotation::Bed(bed) => reference_source(&mut g, "reference.bed", BED_SLOT, bed),
        Annotation::Gtf(gtf) => {
            let gtf = reference_source(&mut g, "reference.gtf", GTF_SLOT, gtf);
            g.stage(StageKind::Gtf2Bed.spec(), &gtf, &[])
        }
    };

    let reads = if on(StageKind::Trim) {
        g.stage(StageKind::Trim.spec(), &samples, &[])
    } else {
        samples
    };

    let map_input = g.each("map.input", &reads, &fasta, &[(FASTA_SLOT, FASTA_SLOT)]);
    let mapped = g.stage(StageKind::Map.spec(), &map_input, &[]);

    let filter_input = match (&refs.mapping_bed, flags.multimappers) {
        (Some(bed), _) => {
            let mapping = reference_source(&mut g, "reference.mapping_bed", MAPPING_BED_SLOT, bed);
            g.each("filter.input", &mapped, &mapping, &[(MAPPING_BED_SLOT, MAPPING_BED_SLOT)])
        }
        (None, true) => g.each("filter.input", &mapped, &utr_bed, &[(BED_SLOT, MAPPING_BED_SLOT)]),
        (None, false) => {
            let none = g.source(Stream::closed_with(
                "reference.mapping_bed",
                vec![StageRecord::keyed(RecordKey::All).with_artifact(MAPPING_BED_SLOT, Artifact::Absent)],
            ));
            g.each("filter.input", &mapped, &none, &[(MAPPING_BED_SLOT, MAPPING_BED_SLOT)])
        }
    };
    let filtered = g.stage(StageKind::Filter.spec(), &filter_input, &[]);

    let report_tables = g.stream("report.tables");
    let mut stat_stages = 0;

    if on(StageKind::Count) {
        // Variant calls come from the supplied file, from SNP calling, or nowhere
        let variants = match &refs.vcf {
            Some(vcf) => {
                let supplied = reference_source(&mut g, "reference.vcf", VCF_SLOT, vcf);
                g.each("variants", &filtered, &supplied, &[(VCF_SLOT, VCF_SLOT)])
            }
            None if on(StageKind::Snp) => {
                let called = g.stage(StageKind::Snp.spec(), &filtered, &[]);
                g.join("variants", &filtered, &called)
            }
            None => {
                let absent = g.source(Stream::sentinel(
                    "variants.absent",
                    StageRecord::keyed(RecordKey::All).with_artifact(VCF_SLOT, Artifact::Absent),
                ));
                g.join("variants", &filtered, &absent)
            }
        };
        let annotated = g.each("annotated", &variants, &utr_bed, &[(BED_SLOT, BED_SLOT)]);

        let counted = g.stage(StageKind::Count.spec(), &annotated, &[]);
        let collapsed = g.stage(StageKind::Collapse.spec(), &counted, &[]);

        for kind in STAT_STAGES.into_iter().filter(|k| on(*k)) {
            let input = if kind == StageKind::Rates { &filtered } else { &annotated };
            g.stage(kind.spec(), input, &[&report_tables]);
            stat_stages += 1;
        }

        if on(StageKind::Deseq2) {
            let grouped = g.group_by("deseq2.input", &collapsed, registry.group_sizes());
            g.stage(StageKind::Deseq2.spec(), &grouped, &[]);
        }
    }

    let summary_input = g.collect("summary.input", &filtered, Some(n_samples), true);
    g.stage(StageKind::Summary.spec(), &summary_input, &[&report_tables]);

    let report_input = g.collect("report.input", &report_tables, Some(n_samples * stat_stages + 1), true);
    g.stage(StageKind::Report.spec(), &report_input, &[]);

    let graph = g.build()?;
    debug!("Built graph with stages: {}", graph.stage_names().join(", "));
    Ok(graph)
}


/// SLAMseq entry point: validates configuration, prepares references, builds the graph and runs it.
pub async fn run(config: Arc<RunConfig>) -> Result<RunReport, PipelineError> {
    let (design, refs, flags) = validate_args(&config.args, &config.cwd)?;

    let registry = load_design(&design, &config.cwd)?;
    for sample in registry.iter() {
        if !sample.reads.exists() {
            return Err(PipelineError::IOError(format!(
                "Reads for sample {} not found: {}",
                sample.name,
                sample.reads.display()
            )));
        }
    }
    info!("Loaded {} sample(s) in {} group(s)", registry.len(), registry.group_sizes().len());

    let refs = refs.prepare(&config.out_dir).await?;
    let graph = build_topology(&flags, &refs, &registry)?;
    info!("Stages: {}", graph.stage_names().join(", "));

    if config.args.skip_tool_check {
        warn!("Skipping tool presence check");
    } else {
        check_tools(graph.tools())?;
    }

    let scheduler = Scheduler::new(SchedulerSettings::from(&*config));
    let executor = Arc::new(CommandExecutor::new(config.clone()));
    let report = scheduler.run(graph, executor).await?;
    report.log_summary();

    if report.is_success() {
        return Ok(report);
    }
    if let Some(starved) = report.starved().first() {
        return Err(PipelineError::BarrierStarved {
            barrier: format!("{} [{}]", starved.barrier, starved.key),
            expected: starved.expected.unwrap_or(0),
            received: starved.received,
        });
    }
    match report.failures.first() {
        Some(failure) => Err(PipelineError::StageFailed {
            stage: failure.stage.clone(),
            key: failure.key.clone(),
            error: failure.error.clone(),
        }),
        None => Err(PipelineError::InvalidConfig("a mandatory barrier never ran".to_string())),
    }
}

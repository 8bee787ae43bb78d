/// Functions and structs for building and running external tool command lines

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Result};
use log::{debug, info};
use tokio::process::Command;

use crate::config::defs::{PipelineError, TOOL_VERSIONS};


/// One external process: program, arguments and optional stdin/stdout redirection to files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: &'static str,
    pub args: Vec<String>,
    pub stdin_from: Option<PathBuf>,
    pub stdout_to: Option<PathBuf>,
}

impl ToolInvocation {
    pub fn new(tool: &'static str, args: Vec<String>) -> Self {
        ToolInvocation {
            tool,
            args,
            stdin_from: None,
            stdout_to: None,
        }
    }
}


fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}


pub mod trim_galore {
    use std::path::{Path, PathBuf};
    use crate::cli::Arguments;
    use crate::config::defs::TRIM_STRINGENCY;
    use crate::utils::file::extension_remover;
    use super::path_arg;

    pub fn arg_generator(args: &Arguments, reads: &Path, out_dir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--stringency".to_string());
        args_vec.push(TRIM_STRINGENCY.to_string());
        args_vec.push("--gzip".to_string());
        args_vec.push("--cores".to_string());
        args_vec.push(args.threads.to_string());
        args_vec.push("-o".to_string());
        args_vec.push(path_arg(out_dir));
        args_vec.push(path_arg(reads));
        args_vec
    }

    pub fn expected_output(reads: &Path, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}_trimmed.fq.gz", extension_remover(reads)))
    }
}


pub mod slamdunk {
    use std::path::{Path, PathBuf};
    use crate::cli::Arguments;
    use crate::config::defs::{SlamdunkSubcommand, MULTIMAPPER_TOPN};
    use crate::engine::registry::Sample;
    use crate::utils::file::extension_remover;
    use super::path_arg;

    /// Inputs for one slamdunk call. Optional paths are only passed when present.
    pub struct SlamdunkConfig<'a> {
        pub subcommand: SlamdunkSubcommand,
        pub input: &'a Path,
        pub fasta: Option<&'a Path>,
        pub bed: Option<&'a Path>,
        pub vcf: Option<&'a Path>,
        pub sample: Option<&'a Sample>,
    }

    fn subcommand_tag(subcommand: SlamdunkSubcommand) -> &'static str {
        match subcommand {
            SlamdunkSubcommand::Map => "map",
            SlamdunkSubcommand::Filter => "filter",
            SlamdunkSubcommand::Snp => "snp",
            SlamdunkSubcommand::Count => "count",
        }
    }

    pub fn arg_generator(args: &Arguments, config: &SlamdunkConfig, out_dir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![subcommand_tag(config.subcommand).to_string()];
        args_vec.push("-o".to_string());
        args_vec.push(path_arg(out_dir));
        if let Some(fasta) = config.fasta {
            args_vec.push("-r".to_string());
            args_vec.push(path_arg(fasta));
        }

        match config.subcommand {
            SlamdunkSubcommand::Map => {
                args_vec.push("-5".to_string());
                args_vec.push(args.trim5.to_string());
                args_vec.push("-a".to_string());
                args_vec.push(args.polya.to_string());
                if args.multimappers {
                    args_vec.push("-n".to_string());
                    args_vec.push(MULTIMAPPER_TOPN.to_string());
                }
                if args.endtoend {
                    args_vec.push("-e".to_string());
                }
                if let Some(sample) = config.sample {
                    args_vec.push("-sn".to_string());
                    args_vec.push(sample.name.clone());
                    args_vec.push("-sy".to_string());
                    args_vec.push(sample.sample_type.clone());
                    args_vec.push("-st".to_string());
                    args_vec.push(sample.time.clone());
                }
                args_vec.push("-ss".to_string());
            }
            SlamdunkSubcommand::Filter => {
                if let Some(bed) = config.bed {
                    args_vec.push("-b".to_string());
                    args_vec.push(path_arg(bed));
                }
            }
            SlamdunkSubcommand::Snp => {
                args_vec.push("-c".to_string());
                args_vec.push(args.min_coverage.to_string());
                args_vec.push("-f".to_string());
                args_vec.push(args.var_fraction.to_string());
            }
            SlamdunkSubcommand::Count => {
                if let Some(bed) = config.bed {
                    args_vec.push("-b".to_string());
                    args_vec.push(path_arg(bed));
                }
                if let Some(vcf) = config.vcf {
                    args_vec.push("-v".to_string());
                    args_vec.push(path_arg(vcf));
                }
                args_vec.push("-l".to_string());
                args_vec.push(args.read_length.unwrap_or_default().to_string());
                args_vec.push("-c".to_string());
                args_vec.push(args.conversions.to_string());
                args_vec.push("-q".to_string());
                args_vec.push(args.base_quality.to_string());
            }
        }

        args_vec.push("-t".to_string());
        args_vec.push(args.threads.to_string());
        args_vec.push(path_arg(config.input));
        args_vec
    }

    pub fn expected_output(subcommand: SlamdunkSubcommand, input: &Path, out_dir: &Path) -> PathBuf {
        let base = extension_remover(input);
        let name = match subcommand {
            SlamdunkSubcommand::Map => format!("{}_slamdunk_mapped.bam", base),
            SlamdunkSubcommand::Filter => format!("{}_filtered.bam", base),
            SlamdunkSubcommand::Snp => format!("{}_snp.vcf", base),
            SlamdunkSubcommand::Count => format!("{}_tcount.tsv", base),
        };
        out_dir.join(name)
    }
}


pub mod alleyoop {
    use std::path::{Path, PathBuf};
    use crate::cli::Arguments;
    use crate::config::defs::AlleyoopSubcommand;
    use crate::utils::file::extension_remover;
    use super::path_arg;

    pub struct AlleyoopConfig<'a> {
        pub subcommand: AlleyoopSubcommand,
        pub inputs: Vec<&'a Path>,
        pub fasta: Option<&'a Path>,
        pub bed: Option<&'a Path>,
        pub vcf: Option<&'a Path>,
    }

    fn subcommand_tag(subcommand: AlleyoopSubcommand) -> &'static str {
        match subcommand {
            AlleyoopSubcommand::Collapse => "collapse",
            AlleyoopSubcommand::Rates => "rates",
            AlleyoopSubcommand::Utrrates => "utrrates",
            AlleyoopSubcommand::Tcperreadpos => "tcperreadpos",
            AlleyoopSubcommand::Tcperutrpos => "tcperutrpos",
            AlleyoopSubcommand::Summary => "summary",
        }
    }

    /// Summary writes a single file, every other subcommand writes into a directory.
    pub fn arg_generator(args: &Arguments, config: &AlleyoopConfig, out: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = vec![subcommand_tag(config.subcommand).to_string()];
        args_vec.push("-o".to_string());
        args_vec.push(path_arg(out));
        if let Some(fasta) = config.fasta {
            args_vec.push("-r".to_string());
            args_vec.push(path_arg(fasta));
        }
        if let Some(bed) = config.bed {
            args_vec.push("-b".to_string());
            args_vec.push(path_arg(bed));
        }
        if let Some(vcf) = config.vcf {
            args_vec.push("-v".to_string());
            args_vec.push(path_arg(vcf));
        }

        match config.subcommand {
            AlleyoopSubcommand::Utrrates | AlleyoopSubcommand::Tcperreadpos | AlleyoopSubcommand::Tcperutrpos => {
                args_vec.push("-l".to_string());
                args_vec.push(args.read_length.unwrap_or_default().to_string());
                args_vec.push("-mq".to_string());
                args_vec.push(args.base_quality.to_string());
            }
            AlleyoopSubcommand::Rates => {
                args_vec.push("-mq".to_string());
                args_vec.push(args.base_quality.to_string());
            }
            AlleyoopSubcommand::Collapse | AlleyoopSubcommand::Summary => {}
        }

        if config.subcommand != AlleyoopSubcommand::Summary {
            args_vec.push("-t".to_string());
            args_vec.push(args.threads.to_string());
        }
        args_vec.extend(config.inputs.iter().map(|p| path_arg(p)));
        args_vec
    }

    pub fn expected_output(subcommand: AlleyoopSubcommand, input: &Path, out_dir: &Path) -> PathBuf {
        let base = extension_remover(input);
        let name = match subcommand {
            AlleyoopSubcommand::Collapse => format!("{}_collapsed.csv", base),
            AlleyoopSubcommand::Rates => format!("{}_overallrates.csv", base),
            AlleyoopSubcommand::Utrrates => format!("{}_mutationrates_utr.csv", base),
            AlleyoopSubcommand::Tcperreadpos => format!("{}_tcperreadpos.csv", base),
            AlleyoopSubcommand::Tcperutrpos => format!("{}_tcperutr.csv", base),
            AlleyoopSubcommand::Summary => "summary.txt".to_string(),
        };
        out_dir.join(name)
    }
}


pub mod deseq2 {
    use std::path::{Path, PathBuf};
    use crate::cli::Arguments;
    use crate::engine::registry::Sample;
    use super::path_arg;

    pub fn arg_generator(args: &Arguments, group: &str, samples: &[&Sample], collapsed: &[&Path], out_dir: &Path) -> Vec<String> {
        let join = |f: fn(&Sample) -> &str| samples.iter().map(|s| f(s)).collect::<Vec<_>>().join(",");
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--group".to_string());
        args_vec.push(group.to_string());
        args_vec.push("--samples".to_string());
        args_vec.push(join(|s| s.name.as_str()));
        args_vec.push("--types".to_string());
        args_vec.push(join(|s| s.sample_type.as_str()));
        args_vec.push("--times".to_string());
        args_vec.push(join(|s| s.time.as_str()));
        args_vec.push("--pvalue".to_string());
        args_vec.push(args.pvalue.to_string());
        args_vec.push("--outdir".to_string());
        args_vec.push(path_arg(out_dir));
        args_vec.extend(collapsed.iter().map(|p| path_arg(p)));
        args_vec
    }

    pub fn expected_output(group: &str, out_dir: &Path) -> PathBuf {
        out_dir.join(format!("{}_deseq2.tsv", group))
    }
}


pub mod multiqc {
    use std::path::{Path, PathBuf};
    use super::path_arg;

    pub fn arg_generator(inputs: &[&Path], out_dir: &Path) -> Vec<String> {
        let mut args_vec: Vec<String> = vec!["-f".to_string(), "-o".to_string(), path_arg(out_dir)];
        args_vec.extend(inputs.iter().map(|p| path_arg(p)));
        args_vec
    }

    pub fn expected_output(out_dir: &Path) -> PathBuf {
        out_dir.join("multiqc_report.html")
    }
}


/// Spawns a tool and waits for it. stderr is captured and returned in the error on a non-zero exit.
/// The child is killed if the future is dropped, so aborting a scheduler task tears the process down.
///
/// # Arguments
///
/// * `invocation` - Program, arguments and redirections.
///
/// # Returns
/// Ok(()) on exit status 0.
pub async fn run_tool(invocation: &ToolInvocation) -> Result<()> {
    debug!("{} {}", invocation.tool, invocation.args.join(" "));

    let stdin = match &invocation.stdin_from {
        Some(path) => Stdio::from(
            std::fs::File::open(path).map_err(|e| anyhow!("Failed to open {}: {}", path.display(), e))?,
        ),
        None => Stdio::null(),
    };
    let stdout = match &invocation.stdout_to {
        Some(path) => Stdio::from(
            std::fs::File::create(path).map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?,
        ),
        None => Stdio::null(),
    };

    let child = Command::new(invocation.tool)
        .args(&invocation.args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| anyhow!("Failed to spawn {}: {}. Is it installed?", invocation.tool, e))?;

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| anyhow!("Failed to wait on {}: {}", invocation.tool, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(anyhow!(
            "{} exited with {}: {}",
            invocation.tool,
            output.status,
            tail.join("\n")
        ));
    }
    Ok(())
}


/// Checks every tool is on PATH before any stage runs.
pub fn check_tools<'a, I>(tools: I) -> Result<(), PipelineError>
where
    I: IntoIterator<Item = &'a str>,
{
    for tool in tools {
        let path = which::which(tool).map_err(|_| PipelineError::ToolNotFound(tool.to_string()))?;
        match TOOL_VERSIONS.get(tool) {
            Some(version) => info!("Found {} at {} (expected version >= {})", tool, path.display(), version),
            None => info!("Found {} at {}", tool, path.display()),
        }
    }
    Ok(())
}

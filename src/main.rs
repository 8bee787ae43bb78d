use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use std::{env, fs};

use anyhow::Result;
use chrono::DateTime;
use env_logger::Builder;
use log::{self, debug, error, info, LevelFilter};

use slamflow::cli::{parse, Arguments};
use slamflow::config::defs::RunConfig;
use slamflow::pipelines::slamseq;
use slamflow::utils::file::resolve_path;
use slamflow::utils::system::{default_forks, detect_cores_and_load};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n SLAMflow\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let (physical_cores, cpu_load) = detect_cores_and_load().await?;
    let forks = default_forks(physical_cores, cpu_load, args.threads);
    debug!("Detected {} physical cores; CPU load {}%; default of {} concurrent stage executions",
              physical_cores, cpu_load, forks);

    let out_dir = setup_output_dir(&args, &dir)?;
    info!("Writing outputs to {}", out_dir.display());

    let run_config = Arc::new(RunConfig::new(args, dir, out_dir, forks));
    info!("Concurrency: {} slot(s), {} heavy", run_config.max_forks, run_config.heavy_forks);

    match slamseq::run(run_config).await {
        Ok(report) => {
            let executions: usize = report.completed.values().sum();
            info!("{} stage execution(s) completed", executions);
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


/// Sets up output directory
/// If `out_dir` is specified from args, uses it;
/// otherwise, creates a directory named `slamflow_YYYYMMDD`.
/// Ensures the directory exists.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// path to the output directory.
fn setup_output_dir(args: &Arguments, cwd: &Path) -> Result<PathBuf> {
    let out_dir = match &args.out_dir {
        Some(out) => resolve_path(out, cwd),
        None => {
            let timestamp = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .ok()
                .and_then(|d| DateTime::from_timestamp(d.as_secs() as i64, 0))
                .map(|dt| dt.format("%Y%m%d").to_string())
                .unwrap_or_else(|| "19700101".to_string());
            cwd.join(format!("slamflow_{}", timestamp))
        }
    };
    fs::create_dir_all(&out_dir)?;
    Ok(out_dir)
}

//! pdfpress command-line front-end
//!
//! Reads PDF, JPEG and PNG files, applies rotations, drops, ordering and a
//! compression profile, then writes one PDF or prints a size estimate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use pdfpress_core::{
    format_size, parse_ranges, Assembly, AssemblyMode, Engine, EngineConfig, EstimateStrategy,
    PageStatus, Profile, ProfilePlan, Rotation, Session, SizeEstimate, SortKey,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pdfpress")]
#[command(version, about = "Merge, rotate and compress PDF pages and images")]
struct Args {
    /// Input files (pdf, jpg, jpeg, png), in order
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output PDF
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compression profile: none, minimal, medium, maximum
    #[arg(short, long, default_value = "none")]
    profile: Profile,

    /// Assembly mode: merge, split, rotate-only
    #[arg(short, long, default_value = "merge")]
    mode: AssemblyMode,

    /// Rotate page N (1-based, ingest order) by DEG degrees clockwise
    #[arg(long, value_name = "N=DEG", value_parser = parse_rotation)]
    rotate: Vec<(usize, Rotation)>,

    /// Leave pages out of the output, e.g. "2,4-6"
    #[arg(long, value_name = "RANGES")]
    drop: Option<String>,

    /// Reorder pages: original, name, kind
    #[arg(long)]
    sort: Option<SortKey>,

    /// Reverse the sort order
    #[arg(long, requires = "sort")]
    reverse: bool,

    /// Print a size estimate instead of writing output
    #[arg(long)]
    estimate: bool,

    /// Estimate from at most N evenly spaced pages
    #[arg(long, value_name = "N", requires = "estimate")]
    sample: Option<usize>,

    /// Engine configuration (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_rotation(s: &str) -> Result<(usize, Rotation), String> {
    let (page, degrees) = s
        .split_once('=')
        .ok_or_else(|| format!("expected N=DEG, got '{}'", s))?;
    let page: usize = page
        .trim()
        .parse()
        .map_err(|_| format!("invalid page number '{}'", page))?;
    if page == 0 {
        return Err("pages are numbered from 1".into());
    }
    let degrees: i64 = degrees
        .trim()
        .parse()
        .map_err(|_| format!("invalid angle '{}'", degrees))?;
    let rotation = Rotation::from_degrees(degrees)
        .ok_or_else(|| format!("angle must be a multiple of 90, got {}", degrees))?;
    Ok((page, rotation))
}

/// Declared kind of an input, from its extension
fn declared_kind(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_string()
}

fn build_engine(args: &Args) -> anyhow::Result<Engine> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    #[cfg(feature = "pdfium")]
    let engine = Engine::with_rasterizer(
        config,
        Arc::new(pdfpress_core::PdfiumRasterizer::new()),
    )?;
    #[cfg(not(feature = "pdfium"))]
    let engine = Engine::new(config)?;

    Ok(engine)
}

fn load_session(args: &Args, engine: Arc<Engine>) -> anyhow::Result<Session> {
    let mut session = Session::new(engine);

    for path in &args.inputs {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        session
            .add_file(&name, &bytes, &declared_kind(path))
            .with_context(|| format!("adding {}", path.display()))?;
    }

    // Page numbers on the command line refer to ingest order
    let ids: Vec<_> = session.pages().iter().map(|p| p.id()).collect();
    let page_id = |number: usize| {
        ids.get(number - 1)
            .copied()
            .with_context(|| format!("page {} out of range (1-{})", number, ids.len()))
    };

    for &(number, rotation) in &args.rotate {
        session.set_rotation(page_id(number)?, rotation)?;
    }
    if let Some(ranges) = &args.drop {
        let page_count = u32::try_from(ids.len()).context("too many pages")?;
        for number in parse_ranges(ranges, page_count)? {
            session.set_keep(page_id(number as usize)?, false)?;
        }
    }
    if let Some(key) = args.sort {
        session.sort_by(key, args.reverse);
    }
    session.set_global_profile(args.profile);

    Ok(session)
}

fn print_estimate(estimate: &SizeEstimate, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(estimate)?);
        return Ok(());
    }

    for outcome in &estimate.pages {
        println!(
            "{:>24}  {:>10} -> {:>10}  {:?}",
            outcome.source_name,
            format_size(outcome.original_size),
            format_size(outcome.result_size),
            outcome.status,
        );
        if let Some(reason) = &outcome.fallback_reason {
            println!("{:>24}  kept original: {}", "", reason);
        }
    }
    println!(
        "Estimated: {} -> {} ({})",
        format_size(estimate.before_total),
        format_size(estimate.after_total),
        estimate.format_savings()
    );
    Ok(())
}

fn print_assembly(assembly: &Assembly, output: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        let summary = serde_json::json!({
            "output": output.display().to_string(),
            "size": assembly.bytes.len(),
            "pages": assembly.pages,
            "excluded": assembly.report.excluded,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let original: usize = assembly
        .pages
        .iter()
        .filter(|o| !matches!(o.status, PageStatus::Excluded(_)))
        .map(|o| o.original_size)
        .sum();
    println!(
        "Wrote {} ({} pages, {} -> {})",
        output.display(),
        assembly.pages.len() - assembly.report.excluded.len(),
        format_size(original),
        format_size(assembly.bytes.len())
    );
    for excluded in &assembly.report.excluded {
        println!("  excluded {}: {}", excluded.source_name, excluded.reason);
    }
    for outcome in &assembly.pages {
        if let Some(reason) = &outcome.fallback_reason {
            println!("  kept original {}: {}", outcome.source_name, reason);
        }
    }
    Ok(())
}

fn run(args: Args) -> anyhow::Result<()> {
    let engine = Arc::new(build_engine(&args)?);
    let session = load_session(&args, engine)?;
    info!(pages = session.pages().len(), profile = %args.profile, "Session ready");

    if args.estimate {
        let strategy = match args.sample {
            Some(max_pages) => EstimateStrategy::Sampled { max_pages },
            None => EstimateStrategy::Exact,
        };
        let estimate = session.estimate(ProfilePlan::Assigned, strategy)?;
        return print_estimate(&estimate, args.json);
    }

    let Some(output) = &args.output else {
        bail!("--output is required unless --estimate is given");
    };

    let assembly = session.assemble(args.mode)?;
    for excluded in &assembly.report.excluded {
        warn!(page = %excluded.page, source = %excluded.source_name, reason = %excluded.reason, "Page excluded");
    }
    std::fs::write(output, &assembly.bytes)
        .with_context(|| format!("writing {}", output.display()))?;
    print_assembly(&assembly, output, args.json)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(args)
}

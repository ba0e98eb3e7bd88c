use std::{
    cmp::Reverse,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::PathBuf,
};

use anyhow::Context;
use itertools::Itertools;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use looprobe::{
    range::AddrRange,
    trace::{replay, replay::DEFAULT_INTERVAL, ReplayOptions, Report},
    AnalysisConfig,
};

#[derive(argh::FromArgs)]
/// replay a commit trace through the loop-point probes
struct Arguments {
    #[argh(positional)]
    /// trace file, `-` for stdin
    trace: PathBuf,

    #[argh(option, short = 'c')]
    /// json analysis config
    config: Option<PathBuf>,

    #[argh(option, short = 'r')]
    /// instructions per region
    region_length: Option<u64>,

    #[argh(option, short = 'n')]
    /// number of cores in the trace
    cores: Option<usize>,

    #[argh(option)]
    /// only profile PCs in START-END
    valid_range: Option<AddrRange>,

    #[argh(option)]
    /// only use backward branches in START-END as markers
    marker_range: Option<AddrRange>,

    #[argh(option, short = 'x')]
    /// never profile PCs in START-END, may be repeated
    exclude: Vec<AddrRange>,

    #[argh(option, short = 'o')]
    /// write the json report here instead of stdout
    output: Option<PathBuf>,

    #[argh(option, default = "DEFAULT_INTERVAL")]
    /// instructions per data movement interval
    interval: u64,

    #[argh(option)]
    /// signal once this many instructions have committed
    inst_target: Option<u64>,
}

impl Arguments {
    fn analysis_config(&self) -> anyhow::Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                AnalysisConfig::from_json(&json)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => AnalysisConfig::default(),
        };

        if let Some(region_length) = self.region_length {
            config.region_length = region_length;
        }
        if let Some(cores) = self.cores {
            config.cores = cores;
        }
        if let Some(range) = self.valid_range {
            config.bb_valid_range = range;
        }
        if let Some(range) = self.marker_range {
            config.marker_valid_range = range;
        }
        config.bb_excluded_ranges.extend(self.exclude.iter().copied());

        config.validate()?;
        Ok(config)
    }

    fn open_trace(&self) -> anyhow::Result<Box<dyn BufRead>> {
        if self.trace.as_os_str() == "-" {
            return Ok(Box::new(io::stdin().lock()));
        }

        let file = File::open(&self.trace)
            .with_context(|| format!("opening trace {}", self.trace.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Arguments = argh::from_env();
    let config = args.analysis_config()?;
    debug!("{:?}", config);

    let options = ReplayOptions {
        interval: args.interval,
        inst_target: args.inst_target.unwrap_or(u64::MAX),
        ..Default::default()
    };
    let report = replay(&config, &options, args.open_trace()?)
        .with_context(|| format!("replaying {}", args.trace.display()))?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    serde_json::to_writer_pretty(&mut out, &report).context("writing report")?;
    writeln!(out)?;
    out.flush()?;

    summarize(&report);
    Ok(())
}

fn summarize(report: &Report) {
    let hottest = report
        .regions
        .iter()
        .flat_map(|region| region.markers.iter())
        .map(|(pc, stats)| (*pc, stats.count))
        .into_grouping_map()
        .sum()
        .into_iter()
        .sorted_by_key(|(pc, count)| (Reverse(*count), *pc))
        .take(5)
        .map(|(pc, count)| format!("{:#x} ({})", pc, count))
        .join(", ");

    eprintln!(
        "{} instructions ({} user), {} regions",
        report.instructions,
        report.user_instructions,
        report.regions.len()
    );
    if !hottest.is_empty() {
        eprintln!("hottest markers: {}", hottest);
    }
}

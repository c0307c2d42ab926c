use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cosim::{ConnectionGraph, CsvResultSink, MasterConfig, MasterLoop, NativeLoader};

#[derive(Parser)]
#[command(name = "cosim")]
#[command(about = "Fixed-step co-simulation master for FMI 1.0 co-simulation components")]
struct Cli {
    /// Run configuration (YAML or JSON)
    config: PathBuf,
    /// Override the end time
    #[arg(long)]
    end_time: Option<f64>,
    /// Override the fixed step size
    #[arg(long)]
    step_size: Option<f64>,
    /// Disable component debug logging
    #[arg(long, default_value_t = false)]
    no_logging: bool,
    /// Override the result field separator
    #[arg(long)]
    separator: Option<char>,
    /// Override the result directory
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Override the log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
    /// Also write the run report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut MasterConfig) {
        let sim = &mut config.simulation;
        if let Some(end_time) = self.end_time {
            sim.end_time = end_time;
        }
        if let Some(step_size) = self.step_size {
            sim.step_size = step_size;
        }
        if self.no_logging {
            sim.logging = false;
        }
        if let Some(separator) = self.separator {
            sim.separator = separator;
        }
        if let Some(dir) = &self.output_dir {
            sim.output_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            sim.log_level = level.clone();
        }
    }
}

fn report_failure(slave: Option<usize>, operation: &str) {
    match slave {
        Some(slave) => eprintln!("slave {slave} failed during {operation}"),
        None => eprintln!("co-simulation failed during {operation}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MasterConfig::from_file(&cli.config)
        .with_context(|| format!("could not read configuration {}", cli.config.display()))?;
    cli.apply(&mut config);
    config.validate().context("invalid command line override")?;
    cosim::init_logging(&config.simulation.log_level);

    let couplings = config.all_couplings()?;
    let sim = &config.simulation;
    println!(
        "run {} slave(s) with {} connection(s) from t=0..{} with h={}, loggingOn={}, separator='{}'",
        config.slave_count(),
        couplings.len(),
        sim.end_time,
        sim.step_size,
        u8::from(sim.logging),
        sim.separator
    );

    std::fs::create_dir_all(&sim.output_dir)
        .with_context(|| format!("could not create {}", sim.output_dir.display()))?;

    let mut registry = match config.load_registry(&NativeLoader) {
        Ok(registry) => registry,
        Err(err) => {
            report_failure(err.slave(), "load");
            return Err(err.into());
        }
    };
    let graph = ConnectionGraph::build(&couplings, &registry).context("could not connect slaves")?;
    info!(
        active = graph.active_count(),
        disabled = graph.disabled().len(),
        "connection graph built"
    );

    let mut sink = CsvResultSink::new(&sim.output_dir, sim.separator);
    let mut master = MasterLoop::new(&mut registry, &graph, sim.end_time, sim.step_size)?
        .with_logging(sim.logging);
    let report = match master.run(&mut sink) {
        Ok(report) => report,
        Err(err) => {
            report_failure(err.slave(), err.operation());
            return Err(err.into());
        }
    };

    report.write_summary(std::io::stdout().lock())?;
    if let Some(path) = &cli.report_json {
        report
            .to_json_file(path)
            .with_context(|| format!("could not write {}", path.display()))?;
    }
    Ok(())
}

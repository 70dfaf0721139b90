use std::io::{BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use calibrix::badscr::command::ReviewCommand;
use calibrix::badscr::detector::{BadScalerReadDetector, check_scaler_read_count};
use calibrix::calib::command::ModuleCommand;
use calibrix::calib::detector::{BadScalerReadKind, Detector, is_taps_pwo};
use calibrix::calib::module::{CalibModule, Environment, ModuleInfo, WriteReport};
use calibrix::calib::strategy::Strategy;
use calibrix::calib::strategy::droop::DroopKind;
use calibrix::calib::tree_time::{CoincidencePair, MinimizerSettings, TreeTimeContext, write_offsets};
use calibrix::config::YamlConfig;
use calibrix::error::CalibError;
use calibrix::histoer::any::AnyHistogram;
use calibrix::store::ParameterStore as _;
use calibrix::store::StoreError;
use calibrix::store::histograms::{HistogramArchive, HistogramFile, HistogramSource};
use calibrix::store::memory::JsonStore;

#[derive(Parser)]
#[command(name = "calibrix", about = "Detector calibration toolkit")]
struct Cli {
    /// Flat YAML file of "Module.Setting" values
    #[arg(long, default_value = "calibrix.yaml")]
    config: PathBuf,
    /// JSON parameter store
    #[arg(long, default_value = "calib_store.json")]
    store: PathBuf,
    /// JSON archive of per-run histograms
    #[arg(long)]
    histograms: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Calibrate every element of a detector
    Calibrate(CalibrateArgs),
    /// Review the bad scaler reads of runs
    Badscr(BadScalerReadArgs),
    /// Fit the time offsets of a whole detector from coincident hit pairs
    TreeTime(TreeTimeArgs),
    /// Compare stored scaler-read counts with the EventInfo histograms
    CheckScalerReads {
        runs: Vec<u32>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StrategyKind {
    PeakPosition,
    TimeOffset,
    EnergyRatio,
    DeltaE,
    DroopPid,
    DroopPizza,
    TimeWalk,
}

impl StrategyKind {
    fn strategy(self) -> Strategy {
        match self {
            Self::PeakPosition => Strategy::peak_position(),
            Self::TimeOffset => Strategy::time_offset(),
            Self::EnergyRatio => Strategy::energy_ratio(),
            Self::DeltaE => Strategy::delta_e_trad(),
            Self::DroopPid => Strategy::droop(DroopKind::Pid),
            Self::DroopPizza => Strategy::droop(DroopKind::Pizza),
            Self::TimeWalk => Strategy::time_walk(),
        }
    }
}

#[derive(clap::Args)]
struct CalibrateArgs {
    /// Prefix of the module's configuration keys, e.g. PID.Time
    #[arg(long)]
    module: String,
    #[arg(long, value_enum)]
    kind: StrategyKind,
    /// Data type of the calibrated values, e.g. Data.PID.T0
    #[arg(long)]
    data_type: String,
    #[arg(long)]
    calibration: String,
    #[arg(long)]
    detector: Detector,
    /// Overrides the detector's element count
    #[arg(long)]
    elements: Option<usize>,
    #[arg(long, value_delimiter = ',', default_value = "0")]
    sets: Vec<usize>,
    /// Monte-Carlo reference histograms
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Pause between elements when processing all of them
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
    #[arg(long)]
    interactive: bool,
}

#[derive(clap::Args)]
struct BadScalerReadArgs {
    /// Module, e.g. NaI or BadScR.PID
    #[arg(long)]
    kind: BadScalerReadKind,
    runs: Vec<u32>,
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
    #[arg(long)]
    interactive: bool,
}

#[derive(clap::Args)]
struct TreeTimeArgs {
    /// JSON list of coincidence pairs
    pairs: PathBuf,
    run: u32,
    #[arg(long)]
    calibration: String,
    #[arg(long, default_value = "Data.TAPS.T0")]
    offset_data: String,
    /// Data type of the gains. Without it every element uses --default-gain
    #[arg(long)]
    gain_data: Option<String>,
    #[arg(long, default_value_t = 0.11771)]
    default_gain: f64,
    #[arg(long, default_value = "TAPS")]
    detector: Detector,
    /// Drop pairs involving TAPS PWO crystals
    #[arg(long)]
    skip_pwo: bool,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`).

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CalibError> {
    let config = if cli.config.exists() {
        YamlConfig::load(&cli.config)?
    } else {
        log::warn!("Configuration {} does not exist, using defaults", cli.config.display());
        YamlConfig::default()
    };
    let mut store = JsonStore::open(&cli.store)?;
    let histograms = match &cli.histograms {
        Some(path) => HistogramArchive::load(path)?,
        None => HistogramArchive::default(),
    };

    match cli.command {
        Command::Calibrate(args) => calibrate(&args, &config, &mut store, &histograms),
        Command::Badscr(args) => review_scaler_reads(&args, &config, &mut store, &histograms),
        Command::TreeTime(args) => tree_time(&args, &config, &store),
        Command::CheckScalerReads { runs } => {
            for run in runs {
                let stored = store.run_scaler_read_count(run).unwrap_or(-1);
                let event_info = histograms.histogram("EventInfo", &[run]);
                let count =
                    check_scaler_read_count(run, stored, event_info.as_ref().and_then(AnyHistogram::as_1d));
                println!("{run}: {count} scaler read(s)");
            }
            Ok(())
        }
    }
}

/// Feeds parsed stdin lines to `handle` until it returns false or input ends.
fn read_commands<T: FromStr<Err = String>>(
    help: &str,
    mut handle: impl FnMut(T) -> Result<bool, CalibError>,
) -> Result<(), CalibError> {
    println!("{help}");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<T>() {
            Ok(command) => {
                if !handle(command)? {
                    return Ok(());
                }
            }
            Err(e) => {
                log::warn!("{e}");
                println!("{help}");
            }
        }
    }
}

fn log_report(report: &WriteReport) {
    if report.is_success() {
        log::info!(
            "Wrote {} column(s) to {} set(s)",
            report.columns_written,
            report.sets_written
        );
    } else {
        log::error!("{} error(s) while writing", report.errors);
    }
    for file in &report.files {
        log::info!("Output written to '{}'", file.display());
    }
}

fn calibrate(
    args: &CalibrateArgs,
    config: &YamlConfig,
    store: &mut JsonStore,
    histograms: &HistogramArchive,
) -> Result<(), CalibError> {
    let reference = args
        .reference
        .as_deref()
        .map(HistogramFile::load)
        .transpose()?;
    let n_elements = args
        .elements
        .unwrap_or_else(|| args.detector.elements(config));

    let env = Environment {
        config,
        store,
        histograms,
        reference: reference.as_ref().map(|r| r as &dyn HistogramSource),
        output_dir: args.output_dir.clone(),
    };
    let info = ModuleInfo::new(&args.module, &args.data_type, &args.calibration, n_elements);
    let mut module = CalibModule::new(info, args.kind.strategy(), env);
    module.start(&args.sets)?;

    if !args.interactive {
        if let Some(report) = module.process_all(Duration::from_millis(args.delay_ms))? {
            log_report(&report);
        }
        return Ok(());
    }

    read_commands(ModuleCommand::HELP, |command| {
        match command {
            ModuleCommand::Next => {
                if let Some(report) = module.next()? {
                    log_report(&report);
                    return Ok(false);
                }
            }
            ModuleCommand::Previous => module.previous()?,
            ModuleCommand::Goto(elem) => module.process_element(elem)?,
            ModuleCommand::SetMarker { index, position } => {
                if module.set_marker(index, position)? {
                    println!("Marker {index} moved to {position}, 'r' re-fits");
                }
            }
            ModuleCommand::Reprocess => module.reprocess_current()?,
            ModuleCommand::ProcessAll(delay) => {
                if let Some(report) = module.process_all(delay)? {
                    log_report(&report);
                    return Ok(false);
                }
            }
            ModuleCommand::Print => module.print_values()?,
            ModuleCommand::Write => log_report(&module.write()?),
            ModuleCommand::Quit => return Ok(false),
        }
        Ok(true)
    })
}

fn print_run(detector: &BadScalerReadDetector<'_>) {
    let Some(index) = detector.index() else {
        return;
    };
    let run = &detector.runs()[index];
    let view = detector.view();
    println!(
        "Run {:05}: reads {}..{}, overview {:.3} (normalised {:.3})",
        run.run, view.first, view.last, run.overview.raw, run.overview.normalised
    );
    if let Some(current) = detector.current() {
        println!("{}", current.describe());
    }
}

fn review_scaler_reads(
    args: &BadScalerReadArgs,
    config: &YamlConfig,
    store: &mut JsonStore,
    histograms: &HistogramArchive,
) -> Result<(), CalibError> {
    let mut detector = BadScalerReadDetector::new(args.kind, config, store, histograms);
    detector.start(&args.runs)?;

    if !args.interactive {
        detector.process_all(Duration::from_millis(args.delay_ms))?;
        detector.write()?;
        return Ok(());
    }

    detector.next()?;
    print_run(&detector);
    read_commands(ReviewCommand::HELP, |command| {
        match command {
            ReviewCommand::Toggle(read) => {
                detector.toggle(read);
            }
            ReviewCommand::ToggleRange(first, last) => {
                detector.toggle_range(first, last);
            }
            ReviewCommand::Interval(interval) => detector.change_interval(interval),
            ReviewCommand::Process => detector.process_current()?,
            ReviewCommand::Next => {
                detector.next()?;
            }
            ReviewCommand::Previous => {
                detector.previous()?;
            }
            ReviewCommand::Goto(index) => detector.goto(index)?,
            ReviewCommand::Write => {
                detector.write()?;
            }
            ReviewCommand::Quit => return Ok(false),
        }
        print_run(&detector);
        Ok(true)
    })
}

fn read_column(
    store: &JsonStore,
    data_type: &str,
    calibration: &str,
    set: usize,
    n: usize,
) -> Result<Vec<f64>, StoreError> {
    let mut values = vec![0.0; n];
    store.read_parameters(data_type, calibration, set, &mut values)?;
    Ok(values)
}

fn tree_time(args: &TreeTimeArgs, config: &YamlConfig, store: &JsonStore) -> Result<(), CalibError> {
    let n = args.detector.elements(config);
    let set = store
        .set_of_run(&args.offset_data, &args.calibration, args.run)
        .ok_or(StoreError::MissingRun(args.run))?;
    log::info!(
        "Reading set {set} for run {} of data '{}' for calibration '{}'",
        args.run,
        args.offset_data,
        args.calibration
    );
    let initial = read_column(store, &args.offset_data, &args.calibration, set, n)?;
    let gains = match &args.gain_data {
        Some(gain_data) => read_column(store, gain_data, &args.calibration, set, n)?,
        None => vec![args.default_gain; n],
    };

    let pairs: Vec<CoincidencePair> =
        serde_json::from_str(&std::fs::read_to_string(&args.pairs)?)?;
    let skip_pwo = args.skip_pwo && args.detector == Detector::TAPS;
    let context = TreeTimeContext::new(gains, pairs, |elem| skip_pwo && is_taps_pwo(elem, n));

    log::info!("Initial cost: {:.6}", context.cost(&initial));
    let offsets = context.minimize(&initial, &MinimizerSettings::default());
    log::info!("Final cost: {:.6}", context.cost(&offsets));

    write_offsets(args.run, &offsets, &args.output_dir)?;
    let differences = context.difference_histogram(&format!("TreeTime_{}", args.run), &offsets);
    write_histogram(
        &args.output_dir.join(format!("tree_time_{}.json", args.run)),
        AnyHistogram::Two(differences),
    )
}

fn write_histogram(path: &Path, histogram: AnyHistogram) -> Result<(), CalibError> {
    let mut file = HistogramFile::default();
    file.insert(histogram);
    std::fs::write(path, serde_json::to_string(&file)?)?;
    log::info!("Time differences written to '{}'", path.display());
    Ok(())
}

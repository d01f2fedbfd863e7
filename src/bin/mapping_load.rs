use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mapping_load::app::{App, ProgressEvent, ProgressSink};
use mapping_load::config::{ConfigLoader, ConfigOverrides};
use mapping_load::convert::{convert_curator_file, verify_identity};
use mapping_load::error::LoadError;
use mapping_load::input::open_input;
use mapping_load::output::JsonOutput;
use mapping_load::store::SqliteStore;

#[derive(Parser)]
#[command(name = "mapping-load")]
#[command(about = "Load marker-to-chromosome mapping assignments into the mapping store")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Load a mapping input file")]
    Load(LoadArgs),
    #[command(about = "Convert a tab-delimited curator file into the load format")]
    Convert(ConvertArgs),
}

#[derive(Args)]
struct LoadArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(short = 'D', long)]
    database: Option<String>,

    #[arg(short = 'I', long)]
    input: Option<String>,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(short = 'M', long, help = "incremental, full or preview")]
    mode: Option<String>,

    #[arg(short = 'E', long)]
    experiment_type: Option<String>,

    #[arg(long, help = "J: number applied to every line (short input layout)")]
    reference: Option<String>,

    #[arg(long, help = "login applied to every line (short input layout)")]
    created_by: Option<String>,

    #[arg(long, help = "print the run summary as JSON")]
    json: bool,
}

#[derive(Args)]
struct ConvertArgs {
    #[arg(short = 'D', long, help = "store used to verify the reference and creator")]
    database: Utf8PathBuf,

    #[arg(short = 'I', long)]
    input: Utf8PathBuf,

    #[arg(short = 'O', long)]
    output: Utf8PathBuf,

    #[arg(long)]
    reference: String,

    #[arg(long)]
    created_by: String,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<LoadError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &LoadError) -> u8 {
    match error {
        LoadError::InvalidMode(_)
        | LoadError::MissingOption(_)
        | LoadError::ConfigRead(_)
        | LoadError::ConfigParse(_)
        | LoadError::InvalidKeySource(_)
        | LoadError::InvalidDelimiter(_)
        | LoadError::UnknownReference(_)
        | LoadError::UnknownUser(_) => 2,
        LoadError::Store(_)
        | LoadError::KeyCollision(_)
        | LoadError::MissingAccessionCounter(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => run_load(args),
        Commands::Convert(args) => run_convert(args),
    }
}

fn run_load(args: LoadArgs) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        database: args.database,
        input: args.input,
        output_dir: args.output_dir,
        mode: args.mode,
        experiment_type: args.experiment_type,
        reference: args.reference,
        created_by: args.created_by,
    };
    let config = ConfigLoader::resolve(args.config.as_deref(), overrides)?;
    let store = SqliteStore::open(&config.database)?;
    let mut app = App::new(store, config);

    if args.json {
        let summary = app.load(&JsonOutput)?;
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    } else {
        let summary = app.load(&StderrProgress)?;
        println!(
            "{}: {} lines, {} accepted, {} rejected, {} experiments created",
            summary.mode,
            summary.lines,
            summary.accepted,
            summary.rejected,
            summary.experiments_created
        );
        if summary.rejected > 0 {
            println!("see {} for rejected lines", summary.outputs.errors);
        }
    }
    Ok(())
}

fn run_convert(args: ConvertArgs) -> miette::Result<()> {
    let store = SqliteStore::open(&args.database)?;
    let reference = verify_identity(&store, &args.reference, &args.created_by)?;
    let reader = open_input(&args.input)?;
    let file = File::create(args.output.as_std_path())
        .map_err(|err| LoadError::Filesystem(format!("create {}: {err}", args.output)))?;
    let summary = convert_curator_file(
        reader,
        BufWriter::new(file),
        reference.as_str(),
        &args.created_by,
    )?;
    if args.json {
        JsonOutput::print_convert(&summary).into_diagnostic()?;
    } else {
        println!("wrote {} lines to {}", summary.written, args.output);
    }
    Ok(())
}

struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

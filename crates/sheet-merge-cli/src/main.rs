//! sheet-merge CLI - copy worksheets between workbooks

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use sheet_merge::{
    list_sheets, merge, preview, Backend, ExcelBackend, ExcelBridgeConfig, Launcher, MergePlan,
    MergeRequest, NativeBackend,
};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "sheet-merge")]
#[command(
    author,
    version,
    about = "Copy worksheets from one workbook into another",
    long_about = "Copy worksheets from one workbook into another.\n\n\
                  Without a subcommand, copies sheets 1-3 of ./result/basic-2.xlsx after \
                  sheets 3-5 of ./result/basic-1.xlsx, names them Sheet4-Sheet6 and saves \
                  ./result/basic-merge.xlsx."
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy sheets from the source workbook into the target and save the result
    Merge(MergeArgs),

    /// List all sheets in a workbook (1-based positions, as used in plans)
    Sheets {
        /// Input spreadsheet file
        input: PathBuf,

        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args, Default)]
struct MergeArgs {
    /// Workbook receiving the sheets [default: ./result/basic-1.xlsx]
    #[arg(long)]
    target: Option<PathBuf>,

    /// Workbook the sheets are copied from [default: ./result/basic-2.xlsx]
    #[arg(long)]
    source: Option<PathBuf>,

    /// Where to save the merged workbook [default: ./result/basic-merge.xlsx]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON merge plan, e.g. {"steps":[{"source":1,"after":3,"rename":"Sheet4"}]}
    #[arg(long)]
    plan: Option<PathBuf>,

    /// Print the resulting sheet order without copying or saving
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Args, Default)]
struct BackendArgs {
    /// Which application performs the merge. `native` keeps the target's
    /// parts and brings the copied sheets' formats and pictures along, but
    /// refuses sheets with tables or pivot tables; `excel` copies anything
    /// Excel can and needs Excel installed
    #[arg(long, value_enum, default_value_t = BackendKind::Native)]
    backend: BackendKind,

    /// Path to excel-com-bridge.exe (excel backend)
    #[arg(long)]
    bridge_exe: Option<PathBuf>,

    /// Run the bridge under this WINE executable (default on non-Windows: wine)
    #[arg(long)]
    wine: Option<PathBuf>,

    /// WINEPREFIX for the bridge process
    #[arg(long)]
    wine_prefix: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Edit the .xlsx packages directly; everything outside the copied sheets is kept as-is
    #[default]
    Native,
    /// Drive Microsoft Excel through the COM bridge
    Excel,
}

impl MergeArgs {
    fn request(&self) -> Result<MergeRequest> {
        let defaults = MergeRequest::default();
        let plan = match &self.plan {
            Some(path) => MergePlan::from_json_file(path)
                .with_context(|| format!("Failed to load plan '{}'", path.display()))?,
            None => defaults.plan,
        };
        Ok(MergeRequest {
            target: self.target.clone().unwrap_or(defaults.target),
            source: self.source.clone().unwrap_or(defaults.source),
            output: self.output.clone().unwrap_or(defaults.output),
            plan,
        })
    }
}

impl BackendArgs {
    fn bridge_config(&self) -> ExcelBridgeConfig {
        let mut config = ExcelBridgeConfig {
            bridge_exe_path: self.bridge_exe.clone(),
            ..Default::default()
        };
        if self.wine.is_some() || self.wine_prefix.is_some() {
            config.launcher = Launcher::Wine {
                wine_path: self.wine.clone().unwrap_or_else(|| PathBuf::from("wine")),
                wine_prefix: self.wine_prefix.clone(),
            };
        }
        config
    }

    fn start_excel(&self) -> Result<ExcelBackend> {
        ExcelBackend::start(self.bridge_config()).context("Failed to start the Excel bridge")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Merge(args)) => run_merge(&args),
        Some(Commands::Sheets { input, backend }) => show_sheets(&input, &backend),
        None => run_merge(&MergeArgs::default()),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_merge(args: &MergeArgs) -> Result<()> {
    let request = args.request()?;
    match args.backend.backend {
        BackendKind::Native => merge_with(NativeBackend::new(), &request, args.dry_run),
        BackendKind::Excel => merge_with(args.backend.start_excel()?, &request, args.dry_run),
    }
}

fn merge_with<B: Backend>(backend: B, request: &MergeRequest, dry_run: bool) -> Result<()> {
    if dry_run {
        let order = preview(backend, request).context("Merge plan does not apply")?;
        print_sheets(&order);
        return Ok(());
    }

    let report = merge(backend, request).with_context(|| {
        format!(
            "Failed to merge '{}' into '{}'",
            request.source.display(),
            request.target.display()
        )
    })?;
    print_sheets(&report.sheets);
    eprintln!("Saved {}", report.output.display());
    Ok(())
}

fn show_sheets(input: &Path, backend: &BackendArgs) -> Result<()> {
    let names = match backend.backend {
        BackendKind::Native => list_sheets(NativeBackend::new(), input),
        BackendKind::Excel => list_sheets(backend.start_excel()?, input),
    }
    .with_context(|| format!("Failed to open '{}'", input.display()))?;

    print_sheets(&names);
    Ok(())
}

fn print_sheets(names: &[String]) {
    for (i, name) in names.iter().enumerate() {
        println!("{}\t{}", i + 1, name);
    }
}

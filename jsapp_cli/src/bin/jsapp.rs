//! Run, snapshot and restore JS apps rooted on the local filesystem.

use jsapp_core::app::{AppProviders, JsApp};
use jsapp_core::context::SnapshotMethod;
use jsapp_core::log;
use jsapp_core::platform::AppPlatform;
use jsapp_core::prelude::*;
use jsapp_core::runtime::{JsRuntimeIsolateHelper, SnapshotAttribute};

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "jsapp", about = "A V8 embedding host for JS apps")]
struct CliOpt {
  /// The app root directory carrying js/, modules/ and resources/.
  #[arg(long, default_value = ".")]
  root: PathBuf,

  /// The app name.
  #[arg(long, default_value = "app")]
  name: String,

  /// The app version.
  #[arg(long, default_value = "0.1.0")]
  app_version: String,

  /// V8 flags, passed through to the engine.
  #[arg(long)]
  v8_flags: Vec<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
  /// Runs the entry point module.
  Run {
    /// Entry point module, may use %TOKEN% prefixes.
    #[arg(default_value = "%JS%/main.js")]
    entry: PathBuf,
  },
  /// Snapshots the app to a blob file.
  Snapshot {
    /// Entry point module baked into the snapshot.
    #[arg(long, default_value = "%JS%/main.js")]
    entry: PathBuf,
    /// Output blob file.
    #[arg(long, default_value = "app.snapshot")]
    output: PathBuf,
  },
  /// Restores an app from a blob file and pumps it once.
  Restore {
    /// Input blob file.
    #[arg(long, default_value = "app.snapshot")]
    snapshot: PathBuf,
  },
}

const MAIN_RUNTIME: &str = "main";
const MAIN_CONTEXT: &str = "main";

fn main() -> ExitCode {
  log::init();
  let cli_opt = CliOpt::parse();
  debug!("cli_opt: {:?}", cli_opt);

  jsapp_core::platform::set_v8_flags(&cli_opt.v8_flags);
  if let Err(e) = AppPlatform::initialize(Box::new(JsRuntimeIsolateHelper)) {
    eprintln!("Failed to initialize the platform: {e}");
    return ExitCode::FAILURE;
  }

  let result = match &cli_opt.command {
    Command::Run { entry } => run_app(&cli_opt, entry),
    Command::Snapshot { entry, output } => snapshot_app(&cli_opt, entry, output),
    Command::Restore { snapshot } => restore_app(&cli_opt, snapshot),
  };

  AppPlatform::shutdown();
  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{e}");
      eprintln!("{e}");
      ExitCode::FAILURE
    }
  }
}

fn run_app(cli_opt: &CliOpt, entry: &Path) -> TheResult<()> {
  let mut app = JsApp::new(&cli_opt.name, &cli_opt.app_version);
  app.initialize(&cli_opt.root, AppProviders::default(), false)?;

  let runtime = app.create_js_runtime(
    MAIN_RUNTIME,
    SnapshotAttribute::NotSnapshottable,
    true,
  )?;
  runtime.borrow_mut().create_context(
    MAIN_CONTEXT,
    Some(entry.to_path_buf()),
    "",
    None,
    false,
    SnapshotMethod::NamespaceAndEntrypoint,
  )?;
  runtime.borrow_mut().process_tasks()?;

  drop(runtime);
  app.dispose_app();
  Ok(())
}

fn snapshot_app(cli_opt: &CliOpt, entry: &Path, output: &Path) -> TheResult<()> {
  let mut app = JsApp::new(&cli_opt.name, &cli_opt.app_version);
  app.initialize(&cli_opt.root, AppProviders::default(), false)?;
  app.create_js_runtime(
    MAIN_RUNTIME,
    SnapshotAttribute::SnapshotAndRestore,
    false,
  )?;
  app
    .get_runtime_by_name(MAIN_RUNTIME)
    .unwrap()
    .borrow_mut()
    .create_context(
      MAIN_CONTEXT,
      Some(entry.to_path_buf()),
      "",
      None,
      true,
      SnapshotMethod::NamespaceAndEntrypoint,
    )?;

  let clone = app.clone_app_for_snapshotting()?;
  clone.borrow_mut().create_snapshot(None, output)?;
  println!("Wrote snapshot to {:?}", output);

  app.dispose_app();
  Ok(())
}

fn restore_app(cli_opt: &CliOpt, snapshot: &Path) -> TheResult<()> {
  let mut app = JsApp::new_restored(&cli_opt.name, &cli_opt.app_version);
  app.restore_initialize(&cli_opt.root, snapshot, AppProviders::default())?;

  let index = app
    .snapshot_provider()
    .unwrap()
    .borrow()
    .get_index_for_runtime_name(MAIN_RUNTIME)
    .ok_or_else(|| {
      TheErr::NotFound(format!("runtime {MAIN_RUNTIME:?} in {snapshot:?}"))
    })?;

  let runtime = app.create_js_runtime_from_index(
    MAIN_RUNTIME,
    index,
    SnapshotAttribute::SnapshotAndRestore,
    false,
  )?;
  runtime
    .borrow_mut()
    .create_context_from_snapshot(MAIN_CONTEXT, None)?;
  runtime.borrow_mut().process_tasks()?;

  drop(runtime);
  app.dispose_app();
  Ok(())
}

pub mod models;
pub mod progress_tracker;
pub mod services;
pub mod settings;
pub mod standard_error;
pub mod state;

pub use models::title_info::{TitleEntry, TitleKey, TitleNode, TrimRange};
pub use services::dumper::{DumpOrchestrator, Summary};
pub use services::ffmpeg::{
    check_tool, ProcessRunner, ProgressKind, ProgressSink, ProgressUpdate, RunResult, RunStatus,
    TitleRunner,
};
pub use services::ffmpeg_command::{CommandBuilder, DumpCommand};
pub use settings::Settings;
pub use standard_error::{DumpError, StandardError};
pub use state::cancel_token::CancelToken;
pub use state::catalog::TitleCatalog;
pub use state::session::DumpSession;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

fn cli() -> Command {
    let iso = Arg::new("iso")
        .value_name("ISO")
        .help("DVD image (or VIDEO_TS directory) to dump from")
        .value_parser(value_parser!(PathBuf))
        .required(true);
    let catalog = Arg::new("catalog")
        .value_name("CATALOG")
        .help("Title catalog JSON produced by the disc parser")
        .value_parser(value_parser!(PathBuf))
        .required(true);

    Command::new("dvd-dumper")
        .version(clap::crate_version!())
        .about(clap::crate_description!())
        .subcommand_required(true)
        .arg(
            Arg::new("ffmpeg")
                .long("ffmpeg")
                .value_name("PATH")
                .help("ffmpeg executable to use instead of the configured one")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Settings file to read instead of the default location")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(Command::new("check").about("Check that ffmpeg can demux DVD video"))
        .subcommand(
            Command::new("list")
                .about("List the titles and angles in a catalog")
                .arg(catalog.clone())
                .arg(
                    Arg::new("details")
                        .short('d')
                        .long("details")
                        .help("Show stream and chapter details for every title")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("dump-one")
                .about("Dump a single title or angle")
                .arg(iso.clone())
                .arg(catalog.clone())
                .arg(
                    Arg::new("title")
                        .short('t')
                        .long("title")
                        .value_name("N")
                        .value_parser(value_parser!(u32).range(1..))
                        .required(true),
                )
                .arg(
                    Arg::new("angle")
                        .short('a')
                        .long("angle")
                        .value_name("N")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("start")
                        .long("start")
                        .value_name("CHAPTER")
                        .help("First chapter to include")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("end")
                        .long("end")
                        .value_name("CHAPTER")
                        .help("Last chapter to include")
                        .value_parser(value_parser!(u32).range(1..)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Output file, defaults to a generated name next to the image")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("dump-all")
                .about("Dump every title and angle")
                .arg(iso)
                .arg(catalog)
                .arg(
                    Arg::new("output-dir")
                        .short('o')
                        .long("output-dir")
                        .value_name("DIR")
                        .help("Directory for the dumped titles, defaults to the image's directory")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        "dvd_dumper_lib=debug,info"
    } else {
        "info"
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .try_init();
}

fn load_settings(matches: &ArgMatches) -> Result<Settings, StandardError> {
    let mut settings = match matches.get_one::<PathBuf>("config") {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(ffmpeg) = matches.get_one::<PathBuf>("ffmpeg") {
        settings.ffmpeg_path = ffmpeg.clone();
    }
    debug!("Using settings {settings:?}");
    Ok(settings)
}

fn path_arg(matches: &ArgMatches, name: &str) -> Result<PathBuf, StandardError> {
    matches.get_one::<PathBuf>(name).cloned().ok_or_else(|| {
        StandardError::new("Missing argument".to_string(), format!("<{name}> is required"))
    })
}

fn spawn_ctrl_c_listener<R>(session: Arc<DumpSession<R>>) -> JoinHandle<()>
where
    R: TitleRunner + Clone + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the running dump");
            session.cancel();
        }
    })
}

/// Prints progress until the channel closes. Returns how many updates it printed.
fn spawn_progress_printer(mut receiver: broadcast::Receiver<ProgressUpdate>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0;
        loop {
            match receiver.recv().await {
                Ok(update) => {
                    printed += 1;
                    match update.kind {
                        ProgressKind::Job => eprint!("\r{:<72}", update.label),
                        ProgressKind::Batch => {
                            eprintln!();
                            info!("{}", update.label);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Skipped {skipped} progress updates"),
                Err(RecvError::Closed) => break,
            }
        }
        printed
    })
}

/// Stops the Ctrl-C listener and releases the session, so the printer sees
/// `RecvError::Closed` only after every queued update. Returns its count.
async fn finish_progress<R>(
    session: Arc<DumpSession<R>>,
    listener: JoinHandle<()>,
    printer: JoinHandle<usize>,
) -> usize {
    listener.abort();
    let _ = listener.await;
    drop(session);
    let printed = match printer.await {
        Ok(printed) => printed,
        Err(e) => {
            debug!("Progress printer stopped early: {e}");
            0
        }
    };
    eprintln!();
    debug!("Printed {printed} progress updates");
    printed
}

async fn wait_for<T, R>(
    session: Arc<DumpSession<R>>,
    listener: JoinHandle<()>,
    handle: JoinHandle<Result<T, DumpError>>,
    printer: JoinHandle<usize>,
) -> Result<T, StandardError> {
    let joined = handle.await;
    finish_progress(session, listener, printer).await;
    let result = joined
        .map_err(|e| StandardError::new("Dump task failed".to_string(), e.to_string()))?;
    Ok(result?)
}

fn print_node(catalog: &TitleCatalog, node: &TitleNode, depth: usize, details: bool) {
    let indent = "  ".repeat(depth);
    println!("{indent}{}", node.label);
    let selected = node.key.as_ref().filter(|_| details);
    if let Some((key, (_, entry))) = selected.and_then(|key| Some((key, catalog.resolve(key)?))) {
        for line in entry.info_lines(key) {
            println!("{indent}    {line}");
        }
        println!("{indent}    Length: {}", entry.human_duration());
        for row in entry.chapter_rows() {
            println!("{indent}    {row}");
        }
    }
    for child in &node.children {
        print_node(catalog, child, depth + 1, details);
    }
}

async fn check(settings: &Settings) -> Result<bool, StandardError> {
    check_tool(&settings.ffmpeg_path).await?;
    println!(
        "{} supports DVD video demuxing",
        settings.ffmpeg_path.display()
    );
    Ok(true)
}

fn list(matches: &ArgMatches) -> Result<bool, StandardError> {
    let catalog = TitleCatalog::load_json(&path_arg(matches, "catalog")?)?;
    let details = matches.get_flag("details");
    for node in catalog.tree() {
        print_node(&catalog, &node, 0, details);
    }
    Ok(true)
}

async fn dump_one(matches: &ArgMatches, settings: Settings) -> Result<bool, StandardError> {
    let input_path = path_arg(matches, "iso")?;
    let catalog = TitleCatalog::load_json(&path_arg(matches, "catalog")?)?;
    let title = matches.get_one::<u32>("title").copied().ok_or_else(|| {
        StandardError::new("Missing argument".to_string(), "--title is required".to_string())
    })?;
    let key = TitleKey::new(title, matches.get_one::<u32>("angle").copied());

    let session = Arc::new(DumpSession::new(catalog, settings));
    let start = matches.get_one::<u32>("start").copied();
    let end = matches.get_one::<u32>("end").copied();
    if start.is_some() || end.is_some() {
        let trim = session.set_trim(title, start.unwrap_or(1), end.unwrap_or(u32::MAX))?;
        info!("Dumping chapters {}-{}", trim.start, trim.end);
    }

    let listener = spawn_ctrl_c_listener(Arc::clone(&session));
    let printer = spawn_progress_printer(session.subscribe_progress());
    let output_path = matches.get_one::<PathBuf>("output").cloned();
    let handle = session.spawn_dump_one(input_path, key, None, output_path)?;
    let result = wait_for(session, listener, handle, printer).await?;

    match result.status {
        RunStatus::Success => {
            println!("Dumped {} to {}", result.key, result.output_path.display());
            Ok(true)
        }
        RunStatus::BenignSkip => {
            println!("Skipped {}: {}", result.key, result.reason);
            Ok(true)
        }
        RunStatus::Fatal => Err(StandardError::new(
            "Dump failed".to_string(),
            format!("Failed to dump {}:\n\n{}", result.key, result.diagnostics),
        )),
        RunStatus::Cancelled => Err(DumpError::Cancelled.into()),
    }
}

async fn dump_all(matches: &ArgMatches, settings: Settings) -> Result<bool, StandardError> {
    let input_path = path_arg(matches, "iso")?;
    let catalog = TitleCatalog::load_json(&path_arg(matches, "catalog")?)?;
    let output_dir = match matches.get_one::<PathBuf>("output-dir") {
        Some(dir) => dir.clone(),
        None => input_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    let session = Arc::new(DumpSession::new(catalog, settings));
    let listener = spawn_ctrl_c_listener(Arc::clone(&session));
    let printer = spawn_progress_printer(session.subscribe_progress());
    let handle = session.spawn_dump_all(input_path, output_dir)?;
    let summary = wait_for(session, listener, handle, printer).await?;

    println!(
        "{} succeeded, {} skipped, {} failed of {} planned{}",
        summary.succeeded.len(),
        summary.skipped.len(),
        summary.failed.len(),
        summary.planned,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    for (key, reason) in &summary.skipped {
        println!("  skipped {key}: {reason}");
    }
    for (key, reason) in &summary.failed {
        println!("  failed {key}: {reason}");
    }
    Ok(summary.failed.is_empty() && !summary.cancelled)
}

async fn dispatch(matches: &ArgMatches) -> Result<bool, StandardError> {
    let settings = load_settings(matches)?;
    match matches.subcommand() {
        Some(("check", _)) => check(&settings).await,
        Some(("list", sub)) => list(sub),
        Some(("dump-one", sub)) => dump_one(sub, settings).await,
        Some(("dump-all", sub)) => dump_all(sub, settings).await,
        _ => Err(StandardError::new(
            "Unknown command".to_string(),
            "run with --help to see the available commands".to_string(),
        )),
    }
}

pub async fn run() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match dispatch(&matches).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e.message);
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::title_info::tests::entry;
    use std::future::Future;

    /// Reports a burst of job progress and succeeds straight away.
    #[derive(Clone)]
    struct BurstRunner {
        updates: usize,
    }

    impl TitleRunner for BurstRunner {
        fn check_tool(&self) -> impl Future<Output = Result<(), DumpError>> + Send {
            async { Ok(()) }
        }

        fn run(
            &self,
            command: &DumpCommand,
            sink: &dyn ProgressSink,
            _cancel: &CancelToken,
        ) -> impl Future<Output = RunResult> + Send {
            for i in 0..self.updates {
                let fraction = (i + 1) as f64 / self.updates as f64;
                sink.report(ProgressUpdate::job(Some(fraction), command.label.clone()));
            }
            let result = RunResult::success(command.key, command.output_path.clone(), String::new());
            async move { result }
        }
    }

    #[tokio::test]
    async fn test_every_progress_update_is_printed_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = TitleCatalog::new();
        catalog.put(TitleKey::title(1), entry(2, &["ac3"], 1)).unwrap();
        let session = Arc::new(DumpSession::with_runner(
            catalog,
            Settings::default(),
            BurstRunner { updates: 40 },
        ));

        let listener = spawn_ctrl_c_listener(Arc::clone(&session));
        let printer = spawn_progress_printer(session.subscribe_progress());
        let summary = session
            .spawn_dump_all(dir.path().join("movie.iso"), dir.path().to_path_buf())
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.succeeded, vec![TitleKey::title(1)]);

        let printed = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            finish_progress(session, listener, printer),
        )
        .await
        .unwrap();
        // 40 job updates, then batch 0/1 and 1/1.
        assert_eq!(printed, 42);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_dump_one_arguments() {
        let matches = cli()
            .try_get_matches_from([
                "dvd-dumper", "--ffmpeg", "/opt/ffmpeg", "dump-one", "movie.iso", "titles.json",
                "--title", "2", "--angle", "1", "--start", "3",
            ])
            .unwrap();
        assert_eq!(
            matches.get_one::<PathBuf>("ffmpeg"),
            Some(&PathBuf::from("/opt/ffmpeg"))
        );
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "dump-one");
        assert_eq!(sub.get_one::<u32>("title"), Some(&2));
        assert_eq!(sub.get_one::<u32>("angle"), Some(&1));
        assert_eq!(sub.get_one::<u32>("start"), Some(&3));
        assert_eq!(sub.get_one::<u32>("end"), None);
    }

    #[test]
    fn test_title_zero_is_rejected() {
        let result = cli().try_get_matches_from([
            "dvd-dumper", "dump-one", "movie.iso", "titles.json", "--title", "0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(cli().try_get_matches_from(["dvd-dumper"]).is_err());
    }
}

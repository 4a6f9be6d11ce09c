//! depsync CLI
//!
//! Synchronizes the binary dependencies of a source tree with the target
//! manifests of its modules.

mod error;
mod prompt;
mod status;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use depsync::fetch::ProxySettings;
use depsync::logging::init_logging;
use depsync::{
    CacheLocation, ConfigFile, FolderFilter, OverwriteMode, SyncConfig, SyncReport, Synchronizer,
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::{CliError, EXIT_OK};
use crate::prompt::ConsoleResolver;
use crate::status::{print_status, print_summary, StatusLine};

/// Keep binary dependencies in sync with their manifests.
#[derive(Debug, Parser)]
#[command(name = "depsync", version, about)]
struct Args {
    /// Root of the tree to synchronize
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Number of parallel pack downloads
    #[arg(long)]
    threads: Option<usize>,

    /// Retries per pack after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Overwrite locally modified files
    #[arg(long, conflicts_with = "prompt")]
    force: bool,

    /// Ask before overwriting locally modified files
    #[arg(long)]
    prompt: bool,

    /// Report what would change without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Keep files in this folder even if excluded by default (repeatable)
    #[arg(long, value_name = "FOLDER", value_delimiter = ',')]
    include: Vec<String>,

    /// Skip files in this folder (repeatable)
    #[arg(long, value_name = "FOLDER", value_delimiter = ',')]
    exclude: Vec<String>,

    /// Synchronize files for every platform
    #[arg(long)]
    all: bool,

    /// Directory for the local pack cache
    #[arg(long, value_name = "PATH", conflicts_with = "no_cache")]
    cache: Option<PathBuf>,

    /// Do not use a local pack cache
    #[arg(long)]
    no_cache: bool,

    /// HTTP proxy, as [user:password@]host[:port]
    #[arg(long)]
    proxy: Option<String>,

    /// Proxy user name, if not given in --proxy
    #[arg(long, requires = "proxy_password")]
    proxy_user: Option<String>,

    /// Proxy password, if not given in --proxy
    #[arg(long, requires = "proxy_user")]
    proxy_password: Option<String>,

    /// Base URL for packs
    #[arg(long)]
    base_url: Option<String>,

    /// Config file (default: ~/.config/depsync/config.ini)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let code = match run(args) {
        Ok(()) => EXIT_OK,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<(), CliError> {
    let file = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::load_default()?,
    };

    let log_file = args.log_file.clone().or_else(|| file.logging.file.clone());
    let _logging = init_logging(args.verbose, log_file.as_deref())?;

    let config = build_config(&args, &file);
    print_status("Checking", &format!("dependencies in {}", config.root_dir.display()));

    let cancel = CancellationToken::new();
    let status = StatusLine::new();
    {
        let cancel = cancel.clone();
        let status = status.clone();
        ctrlc::set_handler(move || {
            status.clear();
            cancel.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
    }

    let mut sync = Synchronizer::new(config)?.with_status(status.callback());
    if sync.config().overwrite == OverwriteMode::Prompt {
        sync = sync.with_resolver(Box::new(ConsoleResolver::new()));
    }

    let started = Instant::now();
    let result = sync.run(&cancel);
    status.clear();

    let report = result.map_err(|e| {
        error!(error = %e, "Synchronization failed");
        CliError::from(e)
    })?;
    print_summary(&report, started);
    check_blocked(&report)
}

/// Resolve settings: command line, then environment, then config file, then
/// defaults.
fn build_config(args: &Args, file: &ConfigFile) -> SyncConfig {
    let filter = if args.all {
        FolderFilter::new()
    } else {
        FolderFilter::platform_defaults()
    };

    let mut config = SyncConfig::new(args.root.clone())
        .with_filter(filter)
        .with_file(file)
        .with_env()
        .with_dry_run(args.dry_run);

    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url.clone());
    }

    if args.force {
        config = config.with_overwrite(OverwriteMode::Force);
    } else if args.prompt {
        config = config.with_overwrite(OverwriteMode::Prompt);
    }

    for folder in &args.include {
        config.filter.include(folder);
    }
    for folder in &args.exclude {
        config.filter.exclude(folder);
    }

    if args.no_cache {
        config = config.with_cache(CacheLocation::Disabled);
    } else if let Some(dir) = &args.cache {
        config = config.with_cache(CacheLocation::At(dir.clone()));
    }

    if let Some(url) = &args.proxy {
        config.proxy = Some(ProxySettings::new(url.clone()));
    }
    if let (Some(user), Some(password)) = (&args.proxy_user, &args.proxy_password) {
        config.proxy = config
            .proxy
            .take()
            .map(|proxy| proxy.with_credentials(user.clone(), password.clone()));
    }

    config
}

fn check_blocked(report: &SyncReport) -> Result<(), CliError> {
    if report.is_blocked() {
        return Err(CliError::Blocked(report.blocked.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("depsync").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_flags_override_file() {
        let file = ConfigFile::parse("[sync]\nthreads = 2\n").unwrap();
        let config = build_config(&parse(&["--threads", "9", "--force"]), &file);

        assert_eq!(config.threads, 9);
        assert_eq!(config.overwrite, OverwriteMode::Force);
    }

    #[test]
    fn test_include_and_exclude() {
        let args = parse(&["--all", "--exclude", "Linux,HTML5", "--include", "html5"]);
        let config = build_config(&args, &ConfigFile::default());

        assert!(config.filter.is_excluded("SDK/Linux/lib.so"));
        assert!(!config.filter.is_excluded("SDK/HTML5/lib.js"));
        assert!(!config.filter.is_excluded("SDK/Win64/lib.dll"));
    }

    #[test]
    fn test_no_cache() {
        let config = build_config(&parse(&["--no-cache"]), &ConfigFile::default());
        assert_eq!(config.cache, CacheLocation::Disabled);
    }

    #[test]
    fn test_proxy_credentials() {
        let args = parse(&[
            "--proxy",
            "proxy:3128",
            "--proxy-user",
            "me",
            "--proxy-password",
            "pw",
        ]);
        let config = build_config(&args, &ConfigFile::default());

        assert_eq!(
            config.proxy,
            Some(ProxySettings::new("proxy:3128").with_credentials("me", "pw"))
        );
    }

    #[test]
    fn test_blocked_report_is_an_error() {
        let mut report = SyncReport::default();
        assert!(check_blocked(&report).is_ok());

        report.blocked.push("SDK/a.bin".to_string());
        assert_eq!(check_blocked(&report).unwrap_err().exit_code(), 2);
    }
}

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use regsync_kernel::accessor::{MemoryRegistry, RegistryAccessor, RegistrySnapshot};
use regsync_kernel::config::RunConfig;
use regsync_kernel::logging::{self, LogFormat};
use regsync_kernel::manifest::Manifest;
use regsync_kernel::path::{HostArch, PathResolver, View};
use regsync_kernel::report::ERROR_MARKER;
use regsync_kernel::reconciler::Reconciler;
use regsync_kernel::{RegsyncError, ResourceId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Fatal declaration or setup error; nothing was applied
const EXIT_FATAL: i32 = 2;

#[cfg(windows)]
const DEFAULT_BACKEND: &str = "windows";
#[cfg(not(windows))]
const DEFAULT_BACKEND: &str = "memory";

fn run_args() -> Vec<Arg> {
    vec![
        Arg::new("manifest")
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("JSON declaration document"),
        Arg::new("purge-values")
            .long("purge-values")
            .value_parser(["on", "off"])
            .help("Run-wide purge default; keys may override it"),
        Arg::new("default-view")
            .long("default-view")
            .default_value("native")
            .value_parser(["native", "32"])
            .help("View for paths without a 32: prefix"),
        Arg::new("workers")
            .long("workers")
            .value_parser(value_parser!(usize))
            .help("Concurrent actions (default: available parallelism)"),
        Arg::new("timeout-secs")
            .long("timeout-secs")
            .default_value("30")
            .value_parser(value_parser!(u64))
            .help("Timeout for each registry call"),
        Arg::new("backend")
            .long("backend")
            .default_value(DEFAULT_BACKEND)
            .value_parser(["windows", "memory"])
            .help("Registry backend"),
        Arg::new("state")
            .long("state")
            .value_parser(value_parser!(PathBuf))
            .help("Memory backend state file, loaded before and saved after the run"),
        Arg::new("arch")
            .long("arch")
            .value_parser(["x64", "x86"])
            .help("Memory backend host architecture (default: this machine)"),
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .action(ArgAction::SetTrue)
            .help("Report unchanged resources and log at debug level"),
        Arg::new("format")
            .long("format")
            .default_value("text")
            .value_parser(["text", "json"])
            .help("Report format"),
    ]
}

#[tokio::main]
async fn main() {
    let cli = Command::new("regsync")
        .version(regsync_kernel::VERSION)
        .about("Declarative Windows Registry reconciliation")
        .subcommand_required(true)
        .subcommand(
            Command::new("apply")
                .about("Converge the registry to a manifest")
                .args(run_args()),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the ordered actions without applying them")
                .args(run_args()),
        )
        .subcommand(
            Command::new("parse")
                .about("Print the canonical identity of a path or reference")
                .arg(Arg::new("path").required(true).help("Registry path or resource reference"))
                .arg(
                    Arg::new("arch")
                        .long("arch")
                        .value_parser(["x64", "x86"])
                        .help("Host architecture (default: this machine)"),
                )
                .arg(
                    Arg::new("default-view")
                        .long("default-view")
                        .default_value("native")
                        .value_parser(["native", "32"]),
                ),
        );

    let matches = cli.get_matches();
    let code = match matches.subcommand() {
        Some(("apply", args)) => report_fatal(apply(args).await),
        Some(("plan", args)) => report_fatal(plan(args).await),
        Some(("parse", args)) => report_fatal(parse(args)),
        _ => EXIT_FATAL,
    };
    std::process::exit(code);
}

fn report_fatal(result: anyhow::Result<i32>) -> i32 {
    result.unwrap_or_else(|e| {
        eprintln!("{ERROR_MARKER} {e:#}");
        EXIT_FATAL
    })
}

/// Accessor selected on the command line, plus where to persist memory state
struct Backend {
    accessor: Arc<dyn RegistryAccessor>,
    memory: Option<(Arc<MemoryRegistry>, PathBuf)>,
}

impl Backend {
    fn open(args: &ArgMatches) -> anyhow::Result<Self> {
        match args.get_one::<String>("backend").map(String::as_str) {
            Some("memory") => {
                let arch = host_arch(args)?;
                let state = args.get_one::<PathBuf>("state").cloned();
                let registry = match &state {
                    Some(path) if path.exists() => Arc::new(load_state(path)?),
                    _ => Arc::new(MemoryRegistry::new(arch)),
                };
                Ok(Self {
                    accessor: registry.clone(),
                    memory: state.map(|path| (registry, path)),
                })
            }
            _ => windows_backend(),
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some((registry, path)) = &self.memory {
            let json = serde_json::to_string_pretty(&registry.snapshot())?;
            std::fs::write(path, json)
                .with_context(|| format!("cannot write state file {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(windows)]
fn windows_backend() -> anyhow::Result<Backend> {
    Ok(Backend {
        accessor: Arc::new(regsync_kernel::accessor::WindowsRegistry::new()),
        memory: None,
    })
}

#[cfg(not(windows))]
fn windows_backend() -> anyhow::Result<Backend> {
    anyhow::bail!("the windows backend is only available on Windows; use --backend memory")
}

fn load_state(path: &Path) -> anyhow::Result<MemoryRegistry> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read state file {}", path.display()))?;
    let snapshot: RegistrySnapshot = serde_json::from_str(&json)
        .with_context(|| format!("malformed state file {}", path.display()))?;
    Ok(MemoryRegistry::from_snapshot(&snapshot)?)
}

fn host_arch(args: &ArgMatches) -> anyhow::Result<HostArch> {
    match args.get_one::<String>("arch") {
        Some(arch) => Ok(arch.parse()?),
        None => Ok(HostArch::detect()),
    }
}

fn default_view(args: &ArgMatches) -> anyhow::Result<View> {
    match args.get_one::<String>("default-view") {
        Some(view) => Ok(view.parse()?),
        None => Ok(View::Native),
    }
}

fn run_config(args: &ArgMatches) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::default()
        .with_default_view(default_view(args)?)
        .with_purge_values(
            args.get_one::<String>("purge-values")
                .map(|flag| flag == "on"),
        );
    if let Some(&workers) = args.get_one::<usize>("workers") {
        config = config.with_max_workers(workers);
    }
    if let Some(&secs) = args.get_one::<u64>("timeout-secs") {
        config = config.with_action_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

fn init_logging(args: &ArgMatches) {
    let format = match args.get_one::<String>("format").map(String::as_str) {
        Some("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };
    logging::init(args.get_flag("verbose"), format);
}

fn load_resources(
    args: &ArgMatches,
    resolver: &PathResolver,
) -> anyhow::Result<Vec<regsync_kernel::Resource>> {
    let path = args
        .get_one::<PathBuf>("manifest")
        .context("manifest path is required")?;
    let manifest = Manifest::load(path).map_err(RegsyncError::from)?;
    Ok(manifest
        .into_resources(resolver)
        .map_err(RegsyncError::from)?)
}

async fn apply(args: &ArgMatches) -> anyhow::Result<i32> {
    init_logging(args);
    let backend = Backend::open(args)?;
    let reconciler = Reconciler::new(Arc::clone(&backend.accessor), run_config(args)?);
    let resources = load_resources(args, &reconciler.resolver())?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing in-flight actions");
            on_interrupt.cancel();
        }
    });

    let report = reconciler
        .apply_with_cancellation(resources, token)
        .await
        .map_err(RegsyncError::from)?;
    backend.save()?;

    if args.get_one::<String>("format").map(String::as_str) == Some("json") {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text(args.get_flag("verbose")));
    }
    for failure in report.failures() {
        info!(id = %failure.id, status = ?failure.status, "not converged");
    }
    Ok(report.exit_code())
}

async fn plan(args: &ArgMatches) -> anyhow::Result<i32> {
    init_logging(args);
    let backend = Backend::open(args)?;
    let reconciler = Reconciler::new(Arc::clone(&backend.accessor), run_config(args)?);
    let resources = load_resources(args, &reconciler.resolver())?;
    let plan = reconciler.plan(resources).await.map_err(RegsyncError::from)?;

    if args.get_one::<String>("format").map(String::as_str) == Some("json") {
        let actions: Vec<String> = plan.describe();
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else {
        for line in plan.describe() {
            println!("{line}");
        }
    }
    Ok(i32::from(plan.has_failures()))
}

fn parse(args: &ArgMatches) -> anyhow::Result<i32> {
    let resolver = PathResolver::new(host_arch(args)?, default_view(args)?);
    let raw = args
        .get_one::<String>("path")
        .context("path is required")?;
    let id = if raw.trim_start().to_ascii_lowercase().starts_with("registry_") {
        resolver.parse_ref(raw)?
    } else {
        ResourceId::Key(resolver.parse(raw)?)
    };
    println!("{id}");
    Ok(0)
}

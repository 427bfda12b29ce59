mod display;
mod output;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand, ValueEnum};
use gcpscout_core::pipeline::{Args, LinkContext, Message};
use gcpscout_core::provider::ClientFactory;
use gcpscout_core::{LogFormat, MemoryCloud, OutputKind, Registry, RestClientFactory, ScoutConfig};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "gcpscout",
    version,
    about = "gcpscout - GCP security reconnaissance",
    long_about = "Walk a GCP organization, folder or project, enumerate its resources, collect \
                  secret-bearing content and run security rules over what it finds."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./gcpscout.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format on stderr
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a module against an organization, folder or project
    Run {
        /// Module id, e.g. list-resources, find-secrets, subdomain-takeover
        module: String,

        #[command(flatten)]
        options: RunOptions,
    },

    /// List available modules
    Modules {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the parameters a module understands
    Describe {
        /// Module id
        module: String,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(ClapArgs, Debug, Default)]
struct RunOptions {
    /// Organization id (bare or organizations/<id>)
    #[arg(short, long)]
    org: Option<String>,

    /// Folder id (bare or folders/<id>)
    #[arg(short, long)]
    folder: Option<String>,

    /// Project id
    #[arg(short, long)]
    project: Option<String>,

    /// Service account key file; application default credentials otherwise
    #[arg(long)]
    creds_file: Option<PathBuf>,

    /// Include system projects (sys-, script-editor-, gcf-, ...)
    #[arg(long)]
    include_sys_projects: bool,

    /// Exclude system projects (legacy inverse of --include-sys-projects)
    #[arg(long)]
    filter_sys_projects: Option<bool>,

    /// Resource kinds, canonical or alias; repeatable or comma-separated
    #[arg(short = 't', long = "type", value_delimiter = ',')]
    types: Vec<String>,

    /// Restrict regional listings to these regions
    #[arg(long, value_delimiter = ',')]
    region: Vec<String>,

    /// Bucket name, for bucket lookups
    #[arg(long)]
    bucket: Option<String>,

    /// Instance name, for instance lookups
    #[arg(long)]
    instance: Option<String>,

    /// Zone, for instance lookups
    #[arg(long)]
    zone: Option<String>,

    /// Service name, for App Engine and Cloud Run lookups
    #[arg(long)]
    service: Option<String>,

    /// Version id, for App Engine lookups
    #[arg(long)]
    version: Option<String>,

    /// Skip objects larger than this many bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Concurrent region/zone workers per project
    #[arg(long)]
    concurrency: Option<usize>,

    /// Leave default service accounts out of primitive-role findings
    #[arg(long)]
    exclude_default_service_accounts: bool,

    /// Forward scanner inputs after secret matching
    #[arg(long)]
    continue_piping: bool,

    /// Directory for the module's JSON output file
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not write an output file
    #[arg(long)]
    no_output_file: bool,

    /// Write scanner inputs as JSON lines to this path
    #[arg(long)]
    np_export: Option<PathBuf>,

    /// Serve provider calls from a JSON cloud snapshot instead of the live APIs
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Output format for stdout (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

impl RunOptions {
    /// Link arguments for the flags that were actually given, so config defaults can
    /// fill the rest.
    fn to_args(&self) -> Args {
        let mut args = Args::new();
        let strings = [
            ("org", &self.org),
            ("folder", &self.folder),
            ("project", &self.project),
            ("bucket", &self.bucket),
            ("instance", &self.instance),
            ("zone", &self.zone),
            ("service", &self.service),
            ("version", &self.version),
        ];
        for (name, value) in strings {
            if let Some(v) = value {
                args = args.with(name, v.as_str());
            }
        }
        if let Some(path) = &self.creds_file {
            args = args.with("creds-file", path.display().to_string());
        }
        if self.include_sys_projects {
            args = args.with("include-sys-projects", true);
        }
        if let Some(filter) = self.filter_sys_projects {
            args = args.with("filter-sys-projects", filter);
        }
        if !self.types.is_empty() {
            args = args.with("type", self.types.clone());
        }
        if !self.region.is_empty() {
            args = args.with("region", self.region.clone());
        }
        if let Some(size) = self.max_file_size {
            args = args.with("max-file-size", i64::try_from(size).unwrap_or(i64::MAX));
        }
        if let Some(n) = self.concurrency {
            args = args.with("concurrency", n);
        }
        if self.exclude_default_service_accounts {
            args = args.with("exclude-default-service-accounts", true);
        }
        if self.continue_piping || self.np_export.is_some() {
            args = args.with("continue-piping", true);
        }
        args
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let config = ScoutConfig::discover(cli.config.as_deref(), &cwd)?;
    let log_format = cli.log_format.map(LogFormat::from).unwrap_or(config.log_format);
    init_logging(cli.verbose, log_format);

    match cli.command {
        Commands::Run { module, options } => cmd_run(&module, &options, &config).await,
        Commands::Modules { format } => cmd_modules(&format),
        Commands::Describe { module } => cmd_describe(&module),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "gcpscout", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_ansi(std::io::stderr().is_terminal()).init(),
    }
}

async fn cmd_run(module_id: &str, options: &RunOptions, config: &ScoutConfig) -> Result<()> {
    let registry = Registry::builtin()?;
    let module = registry.find(module_id)?;
    let args = config.apply(&options.to_args());
    let clients: Arc<dyn ClientFactory> = match &options.snapshot {
        Some(path) => {
            info!(snapshot = %path.display(), "using offline snapshot");
            Arc::new(MemoryCloud::from_file(path)?)
        }
        None => Arc::new(RestClientFactory::new()),
    };
    let ctx = LinkContext::new(args.clone(), clients);

    let cancel = ctx.cancel().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            cancel.cancel();
        }
    });

    info!(module = module.id(), "starting module");
    let mut running = module.start(&ctx).await?;
    let mut messages: Vec<Message> = Vec::new();
    while let Some(msg) = running.recv().await {
        messages.push(msg);
    }
    let result = running.finish().await;

    if let Some(path) = &options.np_export {
        let count = output::write_np_inputs(path, &messages)?;
        info!(path = %path.display(), inputs = count, "exported scanner inputs");
    }

    let written = if options.no_output_file {
        None
    } else {
        let dir = options
            .output_dir
            .clone()
            .or_else(|| config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        let scope = output::scope_id(&args);
        let name = output::output_file_name(module.id(), &scope, chrono::Utc::now().timestamp());
        let path = dir.join(name);
        let count = match module.output {
            OutputKind::Runtime => output::write_runtime_json(&path, &messages)?,
            OutputKind::SecurityFindings => output::write_findings_json(&path, &messages)?,
        };
        Some((path, count))
    };

    match options.format.as_str() {
        "json" => {
            let payload = output::stdout_payload(module.output, &messages);
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        _ => {
            let written = written.as_ref().map(|(p, c)| (p.as_path(), *c));
            display::print_run_report(module, &messages, written)
        }
    }

    result.with_context(|| format!("module {} failed", module.id()))
}

fn cmd_modules(format: &str) -> Result<()> {
    let registry = Registry::builtin()?;
    match format {
        "json" => {
            let modules: Vec<serde_json::Value> = registry
                .modules()
                .map(|m| {
                    serde_json::json!({
                        "platform": m.key.platform,
                        "category": m.key.category,
                        "id": m.key.id,
                        "name": m.name,
                        "description": m.description,
                        "opsec": m.opsec,
                        "output": m.output,
                        "references": m.references,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&modules)?);
        }
        _ => display::print_modules(&registry),
    }
    Ok(())
}

fn cmd_describe(module_id: &str) -> Result<()> {
    let registry = Registry::builtin()?;
    let module = registry.find(module_id)?;
    display::print_module_params(module);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_given_flags_become_args() {
        let options = RunOptions {
            project: Some("alpha".into()),
            types: vec!["bucket".into(), "vm".into()],
            ..Default::default()
        };
        let args = options.to_args();
        assert_eq!(args.str("project"), Some("alpha"));
        assert_eq!(args.list("type"), vec!["bucket", "vm"]);
        assert!(!args.contains("org"));
        assert!(!args.contains("concurrency"));
        assert!(!args.contains("continue-piping"));
    }

    #[test]
    fn test_np_export_turns_on_piping() {
        let options =
            RunOptions { np_export: Some(PathBuf::from("inputs.jsonl")), ..Default::default() };
        assert_eq!(options.to_args().bool("continue-piping"), Some(true));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "gcpscout",
            "run",
            "list-resources",
            "--org",
            "1234",
            "-t",
            "bucket,sql",
            "--region",
            "us-east1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { module, options } => {
                assert_eq!(module, "list-resources");
                assert_eq!(options.types, vec!["bucket", "sql"]);
                assert_eq!(options.org.as_deref(), Some("1234"));
            }
            _ => panic!("expected run"),
        }
    }
}

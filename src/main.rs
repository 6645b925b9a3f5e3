use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sitestack::resources::ViewerProtocolPolicy;
use sitestack::verify::{verify_site, HttpProbe};
use sitestack::{Error, Result, StackConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const TRACING_TARGET_CLI: &str = "sitestack::cli";

#[derive(Debug, Parser)]
#[command(name = "sitestack")]
#[command(about = "Synthesize and verify a static website stack on S3 and CloudFront")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write template.json and deploy.sh into the output directory.
    Synth {
        #[clap(flatten)]
        config: ConfigArgs,

        #[arg(short, long, env = "SITESTACK_OUT_DIR", default_value = "./sitestack.out")]
        out_dir: PathBuf,
    },
    /// Print the resources a deploy would create, in creation order.
    Plan {
        #[clap(flatten)]
        config: ConfigArgs,
    },
    /// Check a deployed site: https redirect, root page and the single page app fallback.
    Verify {
        /// The `<Site>CloudFrontURL` output of the deployed stack.
        url: String,

        /// Local index page the live pages must match.
        #[arg(long)]
        index: Option<PathBuf>,

        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,
    },
}

/// Values given here override the config script.
#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    /// Rhai script evaluating to a map of config values.
    #[arg(short, long, env = "SITESTACK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SITESTACK_STACK_NAME")]
    stack_name: Option<String>,

    #[arg(long, env = "SITESTACK_REGION")]
    region: Option<String>,

    /// Account the distribution lives in. Defaults to the deploying account.
    #[arg(long, env = "SITESTACK_ACCOUNT_ID")]
    account_id: Option<String>,

    /// Directory of built site files.
    #[arg(long, env = "SITESTACK_ASSET_PATH")]
    asset_path: Option<PathBuf>,

    /// Bucket the zipped site is uploaded to before deploying.
    #[arg(long, env = "SITESTACK_STAGING_BUCKET")]
    staging_bucket: Option<String>,

    /// redirect-to-https or https-only.
    #[arg(long, env = "SITESTACK_VIEWER_PROTOCOL_POLICY")]
    viewer_protocol_policy: Option<ViewerProtocolPolicy>,

    #[arg(long, env = "SITESTACK_MEMORY_LIMIT")]
    memory_limit: Option<u32>,

    #[arg(long, env = "SITESTACK_LOG_RETENTION_DAYS")]
    log_retention_days: Option<u32>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<StackConfig> {
        let mut config = match &self.config {
            Some(path) => StackConfig::load_script(path)?,
            None => StackConfig::default(),
        };
        if let Some(v) = &self.stack_name {
            config.stack_name = v.clone();
        }
        if let Some(v) = &self.region {
            config.region = v.clone();
        }
        if let Some(v) = &self.account_id {
            config.account_id = Some(v.clone());
        }
        if let Some(v) = &self.asset_path {
            config.asset_path = v.clone();
        }
        if let Some(v) = &self.staging_bucket {
            config.staging_bucket = Some(v.clone());
        }
        if let Some(v) = self.viewer_protocol_policy {
            config.viewer_protocol_policy = v;
        }
        if let Some(v) = self.memory_limit {
            config.memory_limit = v;
        }
        if let Some(v) = self.log_retention_days {
            config.log_retention_days = v;
        }
        Ok(config)
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let Err(error) = run(cli) else {
        process::exit(0);
    };
    tracing::error!(target: TRACING_TARGET_CLI, error = %error, "sitestack failed");
    process::exit(1);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Synth { config, out_dir } => {
            let config = config.resolve()?;
            let out = sitestack::synth(&config, &out_dir)?;
            println!("Wrote {}", out.template_path.display());
            println!("Wrote {}", out.script_path.display());
            println!("Run {} to deploy {} ({} resources)", out.script_path.display(), config.stack_name, out.resources.len());
        }
        Command::Plan { config } => {
            let config = config.resolve()?;
            let plan = sitestack::plan(&config)?;
            println!("stack {} ({} files, {} bytes staged as {})", plan.stack_name, plan.asset.files.len(), plan.asset.total_bytes, plan.asset.object_key);
            for (i, resource) in plan.resources.iter().enumerate() {
                println!("{:>3}. {:<40} {:<36} {}", i + 1, resource.logical_id, resource.ty, resource.construct_path);
            }
            println!("parameters: {}", plan.parameters.join(", "));
            println!("outputs: {}", plan.outputs.join(", "));
        }
        Command::Verify { url, index, timeout_secs } => {
            let index = match &index {
                Some(path) => Some(read_index(path)?),
                None => None,
            };
            let probe = HttpProbe::new(Duration::from_secs(timeout_secs));
            let report = verify_site(&probe, &url, index.as_deref())?;
            for check in report.checks.iter() {
                let mark = if check.passed { "ok" } else { "FAILED" };
                println!("{mark:>6} {:<14} {} {}", check.name, check.url, check.detail);
            }
            if !report.passed() {
                return Err(Error::Http { url, reason: "site verification failed".to_string() });
            }
        }
    }
    Ok(())
}

fn read_index(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

//! Declares a static website stack (a private bucket, a CloudFront
//! distribution in front of it, an invalidation role and a deployment that
//! uploads the site and invalidates the cache) and synthesizes it into a
//! CloudFormation template plus the `deploy.sh` that ships it.

use std::path::{Path, PathBuf};

pub mod assets;
pub mod config;
pub mod context;
pub mod error;
pub mod resources;
pub mod script;
pub mod template;
pub mod verify;

pub use assets::StagedAsset;
pub use config::StackConfig;
pub use context::{Scope, Stack};
pub use error::{Error, Result};
pub use resources::StaticSite;
use script::shell_quote;
pub use template::Template;

pub const TRACING_TARGET_SYNTH: &str = "sitestack::synth";

pub const TEMPLATE_FILE: &str = "template.json";
pub const DEPLOY_SCRIPT_FILE: &str = "deploy.sh";

/// evaluated by the deploy script, so every run gets a new nonce.
pub const DEPLOYMENT_NONCE_VALUE: &str = "$(date +%s)";

/// declares the site described by `config` into a new stack.
pub fn build_stack(config: &StackConfig, asset: &StagedAsset) -> Result<(Stack, StaticSite)> {
    let mut stack = Stack::new(&config.stack_name)?;
    stack.set_description(&format!("static site {} served through CloudFront", config.construct_id));
    let site = {
        let mut root = stack.root();
        StaticSite::new(&mut root, &config.construct_id, config, asset)?
    };
    Ok((stack, site))
}

#[derive(Debug, Clone)]
pub struct PlannedResource {
    pub logical_id: String,
    pub ty: String,
    pub construct_path: String,
}

/// what a deploy would create, in creation order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub stack_name: String,
    pub asset: StagedAsset,
    pub resources: Vec<PlannedResource>,
    pub parameters: Vec<String>,
    pub outputs: Vec<String>,
}

fn planned_resources(stack: &Stack) -> Result<Vec<PlannedResource>> {
    let template = stack.template();
    let order = template.creation_order()?;
    let planned = order.into_iter()
        .map(|logical_id| {
            let ty = template.resources.get(&logical_id).map(|r| r.ty.clone()).unwrap_or_default();
            let construct_path = stack.construct_path(&logical_id).unwrap_or_default().to_string();
            PlannedResource { logical_id, ty, construct_path }
        })
        .collect();
    Ok(planned)
}

pub fn plan(config: &StackConfig) -> Result<Plan> {
    config.validate()?;
    let asset = StagedAsset::stage(&config.asset_path)?;
    let (stack, _) = build_stack(config, &asset)?;
    let resources = planned_resources(&stack)?;
    Ok(Plan {
        stack_name: stack.name().to_string(),
        asset,
        resources,
        parameters: stack.template().parameters.keys().cloned().collect(),
        outputs: stack.template().outputs.keys().cloned().collect(),
    })
}

#[derive(Debug, Clone)]
pub struct SynthOutput {
    pub template_path: PathBuf,
    pub script_path: PathBuf,
    pub asset: StagedAsset,
    pub resources: Vec<PlannedResource>,
}

/// stages the asset directory, builds the stack, and writes the template
/// and the deploy script into `out_dir`.
pub fn synth<P: AsRef<Path>>(config: &StackConfig, out_dir: P) -> Result<SynthOutput> {
    config.validate()?;
    let staging_bucket = config.staging_bucket.as_deref().ok_or(Error::MissingStagingBucket)?;
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
    // the script may be run from anywhere
    let out_dir = std::fs::canonicalize(out_dir).map_err(|e| Error::io(out_dir, e))?;

    let asset = StagedAsset::stage(&config.asset_path)?;
    let (mut stack, site) = build_stack(config, &asset)?;
    let resources = planned_resources(&stack)?;

    let template_path = out_dir.join(TEMPLATE_FILE);
    let template_json = serde_json::to_string_pretty(stack.template())?;
    std::fs::write(&template_path, template_json).map_err(|e| Error::io(&template_path, e))?;

    let script = stack.script_mut();
    asset.add_commands(script, &out_dir, staging_bucket);
    script.add_param_value(&site.names.assets_bucket, staging_bucket);
    script.add_param_value(&site.names.assets_object_key, &asset.object_key);
    script.add_param_expansion(&site.names.deployment_nonce, DEPLOYMENT_NONCE_VALUE);
    script.add_post_cmd(format!(
        "aws --region {} cloudformation describe-stacks --stack-name {} --query 'Stacks[0].Outputs' --output table",
        shell_quote(&config.region),
        shell_quote(&config.stack_name),
    ));

    let script_path = out_dir.join(DEPLOY_SCRIPT_FILE);
    stack.script().write(&script_path, stack.name(), &config.region, &template_path)?;

    tracing::info!(
        target: TRACING_TARGET_SYNTH,
        stack = stack.name(),
        resources = resources.len(),
        template = %template_path.display(),
        script = %script_path.display(),
        "synthesized stack"
    );
    Ok(SynthOutput { template_path, script_path, asset, resources })
}

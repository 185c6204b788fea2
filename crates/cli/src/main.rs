use anyhow::{Result, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use secrecy::SecretString;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use azbp_azure::{ArmClient, AzureProvider, BlueprintApi, ResourceConfig};
use azbp_core::{Op, parse_scope};
use azbp_policy::Policy;
use azbp_tfcompat as tfc;

#[derive(Parser, Debug)]
#[command(author, version, about="azbp: Azure Blueprint definitions as code")]
struct Cli {
    /// Stack file (YAML)
    #[arg(short, long, default_value="stack.yaml", global = true)]
    file: PathBuf,

    /// Output directory for state and exported Terraform JSON
    #[arg(short, long, default_value="out", global = true)]
    out: PathBuf,

    /// Resource Manager endpoint (overrides the stack's provider block)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token for Resource Manager
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Accept target_scope = managementGroup
    #[arg(long, default_value_t=false, global = true)]
    allow_management_group_target: bool,

    #[arg(short, long, default_value_t=false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)] enum Cmd {
    Validate,
    Plan,
    Apply,
    Destroy,
    /// Read a blueprint by resource id and record it in state
    Import {
        #[arg(long)] id: String,
    },
    Export,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Stack {
    #[serde(default)] project: Option<String>,
    #[serde(default)] provider: Providers,
    #[serde(default)] resources: Vec<ResourceConfig>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct Providers {
    #[serde(default)] azurerm: Option<AzureProvider>,
}

fn load_stack(path: &Path) -> Result<Stack> {
    let bytes = std::fs::read(path).with_context(|| format!("read stack {}", path.display()))?;
    serde_yaml::from_slice(&bytes).with_context(|| format!("parse stack {}", path.display()))
}

fn api_client(cli: &Cli, provider: Option<&AzureProvider>) -> Result<Arc<dyn BlueprintApi>> {
    let token = cli.token.clone()
        .context("no access token; set AZURE_ACCESS_TOKEN or pass --token")?;
    let endpoint = cli.endpoint.clone().or_else(|| provider.and_then(|p| p.endpoint.clone()));
    let api_version = provider.and_then(|p| p.api_version.clone());
    Ok(Arc::new(ArmClient::new(endpoint, api_version, SecretString::new(token))))
}

fn print_plan(plan: &[(azbp_core::Address, Op)]) {
    let (mut create, mut update, mut delete) = (0, 0, 0);
    for (address, op) in plan {
        let sigil = match op {
            Op::Create(_) => { create += 1; "+" }
            Op::Update { .. } => { update += 1; "~" }
            Op::Delete(_) => { delete += 1; "-" }
            Op::Noop => continue,
        };
        println!("{sigil} {address} ({})", op.verb());
    }
    println!("Plan: {create} to create, {update} to update, {delete} to destroy.");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().json()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .init();
    let policy = Policy::new(cli.allow_management_group_target);

    // import works without a stack file
    let stack = match &cli.cmd {
        Cmd::Import { .. } if !cli.file.exists() => Stack::default(),
        _ => load_stack(&cli.file)?,
    };
    let provider = stack.provider.azurerm.as_ref();
    info!(project = stack.project.as_deref().unwrap_or("azbp"), resources = stack.resources.len(), "loaded stack");

    match &cli.cmd {
      Cmd::Validate => {
          let diags = policy.check(&stack.resources);
          for d in &diags { println!("{d}"); }
          if !diags.is_empty() { anyhow::bail!("{} configuration error(s)", diags.len()); }
          println!("{} resource(s) valid.", stack.resources.len());
      },
      Cmd::Plan => {
          policy.enforce(&stack.resources)?;
          let resources = azbp_azure::build_resources(&stack.resources, api_client(&cli, provider)?)?;
          let plan = azbp_core::plan_all(&resources).await?;
          print_plan(&plan);
      },
      Cmd::Apply => {
          policy.enforce(&stack.resources)?;
          let resources = azbp_azure::build_resources(&stack.resources, api_client(&cli, provider)?)?;
          let plan = azbp_core::plan_all(&resources).await?;
          print_plan(&plan);
          let applied = azbp_core::apply_all(&resources, &plan).await?;
          let mut state = tfc::read_state(&cli.out)?;
          for (address, cur) in applied {
              state.record(&address.0, cur.map(|c| c.0));
          }
          tfc::write_state(&state, &cli.out)?;
          println!("Apply complete.");
      },
      Cmd::Destroy => {
          policy.enforce(&stack.resources)?;
          let resources = azbp_azure::build_resources(&stack.resources, api_client(&cli, provider)?)?;
          let gone = azbp_core::destroy_all(&resources).await?;
          for address in &gone {
              println!("- {address} (delete)");
          }
          // resources deleted outside azbp are not in `gone` but leave state too
          let mut state = tfc::read_state(&cli.out)?;
          state.forget(resources.iter().map(|r| r.address().0.as_str()));
          tfc::write_state(&state, &cli.out)?;
          println!("Destroy complete. {} resource(s) destroyed.", gone.len());
      },
      Cmd::Import { id } => {
          info!(scope = %parse_scope(id), "importing blueprint");
          let api = api_client(&cli, provider)?;
          let imported = azbp_azure::import_blueprint(api.as_ref(), id).await?;
          let address = azbp_core::Address::new(azbp_azure::config::BLUEPRINT, &imported.name);
          let attributes = serde_json::to_value(&imported)?;
          println!("{}", serde_json::to_string_pretty(&attributes)?);
          let mut state = tfc::read_state(&cli.out)?;
          state.record(&address.0, Some(attributes));
          tfc::write_state(&state, &cli.out)?;
      },
      Cmd::Export => {
          policy.enforce(&stack.resources)?;
          let mut tf = json!({ "terraform": { "required_providers": {
              "azurerm": { "source": "hashicorp/azurerm", "version": ">= 2.0" }
          } } });
          tf = tfc::merge(tf, provider.cloned().unwrap_or_default().to_tf_json());
          for r in &stack.resources {
              tf = tfc::merge(tf, r.to_tf_json()?);
          }
          tfc::write_tf_json(&tf, &cli.out)?;
          println!("Wrote {}", cli.out.join("main.tf.json").display());
      },
    }
    Ok(())
}

use super::cli::{CliArgs, Command};
use super::context::RunContext;
use super::identity::IdentityStrategy;
use super::kubeconfig::assemble;
use super::token::exec_credential_json;
use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "kubeconf=info";

/// Logs go to stderr so stdout stays clean for the `token` subcommand.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Mints a token and describes the cluster under the same identifier, then
/// writes the assembled kubeconfig.
pub async fn generate_kubeconfig(
    ctx: &RunContext,
    cluster_name: &str,
    output: &Path,
) -> Result<()> {
    let token = ctx.mint_token(cluster_name)?;
    let facts = ctx.describe_cluster(cluster_name).await?;
    let kubeconfig = assemble(&facts, &token)?;
    kubeconfig.write_to(output).await?;
    Ok(())
}

pub async fn run() -> Result<()> {
    let args = CliArgs::parse();
    init_logging();
    let settings = args.aws_settings();

    match &args.command {
        Command::Generate(generate) => {
            let strategy = IdentityStrategy::try_from(&generate.role)?;
            let ctx = RunContext::resolve(&settings, &strategy).await?;
            generate_kubeconfig(
                &ctx,
                &generate.cluster.cluster_name,
                &generate.output.output_file,
            )
            .await?;
        }
        Command::GenerateGha(gha) => {
            let strategy = gha.identity_strategy()?;
            let ctx = RunContext::resolve(&settings, &strategy).await?;
            generate_kubeconfig(&ctx, &gha.cluster.cluster_name, &gha.output.output_file).await?;
        }
        Command::Token(token_args) => {
            let strategy = IdentityStrategy::try_from(&token_args.role)?;
            let ctx = RunContext::resolve(&settings, &strategy).await?;
            let token = ctx.mint_token(&token_args.cluster.cluster_name)?;
            let creds = exec_credential_json(&token)?;
            tokio::io::stdout().write_all(creds.as_bytes()).await?;
            tokio::io::stdout().flush().await?;
        }
    }

    Ok(())
}

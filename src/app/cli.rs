use crate::app::context::AwsSettings;
use crate::app::federation::{FederationSource, RetryPolicy, DEFAULT_AUDIENCE};
use crate::app::identity::{IdentityError, IdentityStrategy, RoleArn, DEFAULT_SESSION_NAME};
use crate::app::kubeconfig::DEFAULT_OUTPUT_FILE;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Name of the AWS region that the cluster is in
    #[clap(short, long, global = true, env = "AWS_REGION", default_value = "eu-west-1")]
    pub region: String,

    /// AWS profile to use for authentication
    #[clap(short, long, global = true, env = "AWS_PROFILE", default_value = None)]
    pub profile: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a kubeconfig file for an EKS cluster, optionally by assuming an AWS IAM role
    Generate(GenerateArgs),

    /// Generate a kubeconfig file for an EKS cluster by assuming an AWS IAM role using GitHub Actions OIDC
    GenerateGha(GenerateGhaArgs),

    /// Print an ExecCredential for an EKS cluster, for use as a kubectl exec plugin
    Token(TokenArgs),
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Name of the EKS Kubernetes cluster to get credentials for
    #[clap(short, long = "eks-cluster-name", alias = "cluster-name")]
    pub cluster_name: String,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Name of the file to write the generated kubeconfig to
    #[clap(short, long, default_value = DEFAULT_OUTPUT_FILE)]
    pub output_file: PathBuf,
}

#[derive(Args, Debug)]
pub struct RoleArgs {
    /// ARN of the AWS IAM role to assume
    #[clap(long, env = "AWS_ROLE_ARN", default_value = None)]
    pub role_arn: Option<String>,

    /// Session name to use when assuming the role
    #[clap(short = 's', long, env = "AWS_ROLE_SESSION_NAME", default_value = DEFAULT_SESSION_NAME)]
    pub role_session_name: String,
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[clap(flatten)]
    pub cluster: ClusterArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    #[clap(flatten)]
    pub role: RoleArgs,
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    #[clap(flatten)]
    pub cluster: ClusterArgs,

    #[clap(flatten)]
    pub role: RoleArgs,
}

#[derive(Args, Debug)]
pub struct GenerateGhaArgs {
    #[clap(flatten)]
    pub cluster: ClusterArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// ARN of the AWS IAM role to assume
    #[clap(long, env = "AWS_ROLE_ARN")]
    pub role_arn: String,

    /// Session name to use when assuming the role
    #[clap(short = 's', long, env = "AWS_ROLE_SESSION_NAME", default_value = DEFAULT_SESSION_NAME)]
    pub role_session_name: String,

    /// Audience requested for the OIDC token
    #[clap(long, default_value = DEFAULT_AUDIENCE)]
    pub audience: String,

    /// How many times to request the OIDC token before giving up
    #[clap(long, default_value_t = 3)]
    pub oidc_attempts: u32,

    /// Seconds to wait before the first OIDC token retry
    #[clap(long, default_value_t = 2)]
    pub oidc_initial_wait_secs: u64,

    /// Upper bound in seconds on the wait between OIDC token retries
    #[clap(long, default_value_t = 10)]
    pub oidc_max_wait_secs: u64,
}

impl CliArgs {
    pub fn aws_settings(&self) -> AwsSettings {
        AwsSettings {
            region: self.region.clone(),
            profile: self.profile.clone(),
        }
    }
}

impl TryFrom<&RoleArgs> for IdentityStrategy {
    type Error = IdentityError;

    fn try_from(args: &RoleArgs) -> Result<Self, Self::Error> {
        match args.role_arn.as_deref().filter(|arn| !arn.is_empty()) {
            Some(role_arn) => IdentityStrategy::assumed_role(role_arn, &args.role_session_name),
            None => Ok(IdentityStrategy::Default),
        }
    }
}

impl GenerateGhaArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.oidc_attempts,
            initial_wait: Duration::from_secs(self.oidc_initial_wait_secs),
            max_wait: Duration::from_secs(self.oidc_max_wait_secs),
        }
    }

    /// Validates the role and the CI token endpoint inputs. Nothing here
    /// touches the network.
    pub fn identity_strategy(&self) -> anyhow::Result<IdentityStrategy> {
        self.role_arn.parse::<RoleArn>()?;
        let federation = FederationSource::from_env(&self.audience, self.retry_policy())?;
        Ok(IdentityStrategy::web_identity(
            &self.role_arn,
            &self.role_session_name,
            federation,
        )?)
    }
}

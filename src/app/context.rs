use anyhow::{Context as _, Result};
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::SdkConfig;
use tracing::debug;

use super::cluster::{describe_cluster, ClusterFacts};
use super::identity::{caller_identity_arn, resolve_credentials, IdentityStrategy};
use super::token::{mint_token, MintedToken};

/// Settings for loading the ambient AWS configuration.
#[derive(Debug, Clone)]
pub struct AwsSettings {
    pub region: String,
    pub profile: Option<String>,
}

pub async fn load_shared_config(settings: &AwsSettings) -> SdkConfig {
    let region = aws_config::Region::new(settings.region.clone());
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
    if let Some(profile) = &settings.profile {
        loader = loader.profile_name(profile);
    }
    loader.load().await
}

/// Everything the later pipeline stages need, fixed once the identity for the
/// run has been resolved.
#[derive(Debug)]
pub struct RunContext {
    region: String,
    shared_config: SdkConfig,
    credentials: Credentials,
}

impl RunContext {
    pub async fn resolve(settings: &AwsSettings, strategy: &IdentityStrategy) -> Result<Self> {
        let shared_config = load_shared_config(settings).await;
        let credentials = resolve_credentials(&shared_config, strategy)
            .await
            .with_context(|| format!("Unable to resolve the {} AWS identity", strategy.name()))?;
        caller_identity_arn(&shared_config, &credentials).await?;
        debug!(region = %settings.region, "run context ready");

        Ok(RunContext {
            region: settings.region.clone(),
            shared_config,
            credentials,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        region: &str,
        shared_config: SdkConfig,
        credentials: Credentials,
    ) -> Self {
        RunContext {
            region: region.to_string(),
            shared_config,
            credentials,
        }
    }

    pub fn mint_token(&self, cluster_id: &str) -> Result<MintedToken> {
        Ok(mint_token(&self.credentials, &self.region, cluster_id)?)
    }

    pub async fn describe_cluster(&self, name: &str) -> Result<ClusterFacts> {
        Ok(describe_cluster(&self.shared_config, &self.credentials, name).await?)
    }
}

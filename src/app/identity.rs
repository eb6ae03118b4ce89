use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::Credentials;
use aws_sdk_sts::operation::assume_role::AssumeRoleError;
use aws_sdk_sts::operation::assume_role_with_web_identity::AssumeRoleWithWebIdentityError;
use aws_sdk_sts::operation::get_caller_identity::GetCallerIdentityError;
use aws_types::SdkConfig;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info};

use super::federation::{FederationError, FederationSource};
use super::mask::mask_secret;

pub const DEFAULT_SESSION_NAME: &str = "kubeconf-session";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("{value:?} is not a valid IAM role ARN (expected arn:<partition>:iam::<account-id>:role/<name>)")]
    InvalidRoleArn { value: String },

    #[error(
        "Credentials provider was None when trying to get credentials from the AWS shared config"
    )]
    CredentialsProviderNone,

    #[error("Unable to get credentials from the AWS credentials provider: {source}")]
    CredentialsProviderError {
        source: aws_credential_types::provider::error::CredentialsError,
    },

    #[error("Failed to assume role {role_arn}: {source}")]
    AssumeRole {
        role_arn: RoleArn,
        source: aws_sdk_sts::error::SdkError<AssumeRoleError>,
    },

    #[error("Failed to assume role {role_arn} with web identity: {source}")]
    AssumeRoleWithWebIdentity {
        role_arn: RoleArn,
        source: aws_sdk_sts::error::SdkError<AssumeRoleWithWebIdentityError>,
    },

    #[error("STS returned no credentials when assuming role {role_arn}")]
    MissingCredentials { role_arn: RoleArn },

    #[error("Failed to obtain a federation token: {source}")]
    Federation { source: FederationError },

    #[error("Failed to look up the caller identity: {source}")]
    CallerIdentity {
        source: aws_sdk_sts::error::SdkError<GetCallerIdentityError>,
    },
}

/// A syntactically valid IAM role ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleArn(String);

impl RoleArn {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoleArn {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || IdentityError::InvalidRoleArn {
            value: value.to_string(),
        };

        let parts: Vec<&str> = value.splitn(6, ':').collect();
        let [prefix, partition, service, region, account, resource] = parts[..] else {
            return Err(invalid());
        };

        let role_name = resource.strip_prefix("role/").ok_or_else(invalid)?;
        let account_ok = account.len() == 12 && account.chars().all(|c| c.is_ascii_digit());
        if prefix != "arn"
            || partition.is_empty()
            || service != "iam"
            || !region.is_empty()
            || !account_ok
            || role_name.is_empty()
        {
            return Err(invalid());
        }

        Ok(RoleArn(value.to_string()))
    }
}

impl fmt::Display for RoleArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the AWS identity for this run is obtained. Exactly one per run.
#[derive(Debug, Clone)]
pub enum IdentityStrategy {
    /// The ambient credential chain (env vars, profiles, instance metadata).
    Default,
    AssumedRole {
        role_arn: RoleArn,
        session_name: String,
    },
    WebIdentity {
        role_arn: RoleArn,
        session_name: String,
        federation: FederationSource,
    },
}

impl IdentityStrategy {
    pub fn assumed_role(role_arn: &str, session_name: &str) -> Result<Self, IdentityError> {
        Ok(IdentityStrategy::AssumedRole {
            role_arn: role_arn.parse()?,
            session_name: session_name.to_string(),
        })
    }

    pub fn web_identity(
        role_arn: &str,
        session_name: &str,
        federation: FederationSource,
    ) -> Result<Self, IdentityError> {
        Ok(IdentityStrategy::WebIdentity {
            role_arn: role_arn.parse()?,
            session_name: session_name.to_string(),
            federation,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            IdentityStrategy::Default => "default",
            IdentityStrategy::AssumedRole { .. } => "assumed-role",
            IdentityStrategy::WebIdentity { .. } => "web-identity",
        }
    }
}

fn from_sts_credentials(
    role_arn: &RoleArn,
    credentials: Option<&aws_sdk_sts::types::Credentials>,
    provider_name: &'static str,
) -> Result<Credentials, IdentityError> {
    let credentials = credentials.ok_or_else(|| IdentityError::MissingCredentials {
        role_arn: role_arn.clone(),
    })?;
    let expiry = SystemTime::try_from(*credentials.expiration()).ok();

    Ok(Credentials::new(
        credentials.access_key_id(),
        credentials.secret_access_key(),
        Some(credentials.session_token().to_string()),
        expiry,
        provider_name,
    ))
}

async fn ambient_credentials(shared_config: &SdkConfig) -> Result<Credentials, IdentityError> {
    shared_config
        .credentials_provider()
        .ok_or(IdentityError::CredentialsProviderNone)?
        .provide_credentials()
        .await
        .map_err(|source| IdentityError::CredentialsProviderError { source })
}

/// Resolves the credentials for `strategy`. Role assumption uses the ambient
/// identity of `shared_config` as its source.
pub async fn resolve_credentials(
    shared_config: &SdkConfig,
    strategy: &IdentityStrategy,
) -> Result<Credentials, IdentityError> {
    debug!(strategy = strategy.name(), "resolving AWS identity");

    let credentials = match strategy {
        IdentityStrategy::Default => ambient_credentials(shared_config).await?,
        IdentityStrategy::AssumedRole {
            role_arn,
            session_name,
        } => {
            let client = aws_sdk_sts::Client::new(shared_config);
            let output = client
                .assume_role()
                .role_arn(role_arn.as_str())
                .role_session_name(session_name)
                .send()
                .await
                .map_err(|source| IdentityError::AssumeRole {
                    role_arn: role_arn.clone(),
                    source,
                })?;
            from_sts_credentials(role_arn, output.credentials(), "AssumeRole")?
        }
        IdentityStrategy::WebIdentity {
            role_arn,
            session_name,
            federation,
        } => {
            let web_identity_token = federation
                .fetch_token(&reqwest::Client::new())
                .await
                .map_err(|source| IdentityError::Federation { source })?;

            let client = aws_sdk_sts::Client::new(shared_config);
            let output = client
                .assume_role_with_web_identity()
                .role_arn(role_arn.as_str())
                .role_session_name(session_name)
                .web_identity_token(web_identity_token)
                .send()
                .await
                .map_err(|source| IdentityError::AssumeRoleWithWebIdentity {
                    role_arn: role_arn.clone(),
                    source,
                })?;
            from_sts_credentials(role_arn, output.credentials(), "AssumeRoleWithWebIdentity")?
        }
    };

    debug!(
        access_key_id = %mask_secret(credentials.access_key_id()),
        expiry = ?credentials.expiry(),
        "resolved AWS credentials"
    );
    Ok(credentials)
}

/// Looks up the ARN the resolved credentials act as.
pub async fn caller_identity_arn(
    shared_config: &SdkConfig,
    credentials: &Credentials,
) -> Result<String, IdentityError> {
    let config = aws_sdk_sts::config::Builder::from(shared_config)
        .credentials_provider(credentials.clone())
        .build();
    let output = aws_sdk_sts::Client::from_conf(config)
        .get_caller_identity()
        .send()
        .await
        .map_err(|source| IdentityError::CallerIdentity { source })?;

    let arn = output.arn().unwrap_or_default().to_string();
    info!(arn = %arn, "authenticated to AWS");
    Ok(arn)
}

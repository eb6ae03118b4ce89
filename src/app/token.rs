use aws_credential_types::Credentials;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

use super::mask::mask_secret;

/// Fixed prefix of every EKS authentication token.
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Header binding the signed request to one cluster.
pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

/// STS ignores this value and always honours a 15 minute window from the
/// signing timestamp. Older authenticators reject anything outside 0..=60.
pub const PRESIGN_EXPIRES_SECS: u64 = 60;

/// How long STS accepts a presigned GetCallerIdentity request.
pub const TOKEN_VALIDITY: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecCredential {
    pub kind: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub spec: HashMap<String, ()>,
    pub status: ExecCredentialStatus,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExecCredentialStatus {
    #[serde(rename = "expirationTimestamp")]
    pub expiration_timestamp: String,
    pub token: String,
}

/// An authentication token together with the cluster it was minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    pub cluster_id: String,
    pub token: String,
    pub signed_at: DateTime<Utc>,
}

impl MintedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.signed_at + chrono::Duration::seconds(TOKEN_VALIDITY.as_secs() as i64)
    }

    pub fn exec_credential(&self) -> ExecCredential {
        ExecCredential {
            kind: "ExecCredential".to_string(),
            api_version: "client.authentication.k8s.io/v1beta1".to_string(),
            spec: HashMap::new(),
            status: ExecCredentialStatus {
                expiration_timestamp: self
                    .expires_at()
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                token: self.token.clone(),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Failed to build the signing params for the EKS authentication request: {source}")]
    FailedToBuildSigningParams {
        source: aws_sigv4::sign::v4::signing_params::BuildError,
    },

    #[error("Failed to build HTTP request for authenticating to EKS: {source}")]
    FailedToBuildHttpRequest { source: http::Error },

    #[error("HTTP request for authenticating to EKS has a non-ASCII header: {source}")]
    NonAsciiHeader { source: http::header::ToStrError },

    #[error("Failed to create signable request to sign EKS authentication request: {source}")]
    FailedToCreateSignableRequest {
        source: aws_sigv4::http_request::SigningError,
    },

    #[error("Failed to sign HTTP request for authenticating against EKS cluster: {source}")]
    FailedToSignHttpRequest {
        source: aws_sigv4::http_request::SigningError,
    },

    #[error("Failed to serialize EKS authentication token: {source}")]
    FailedToSerializeToken { source: serde_json::Error },
}

fn caller_identity_uri(region: &str) -> String {
    format!(
        "https://sts.{}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15",
        region
    )
}

/// Presigns an STS GetCallerIdentity request bound to `cluster_id`. The
/// signature lives in the query string and covers the cluster id header.
pub fn presign_caller_identity(
    credentials: &Credentials,
    region: &str,
    cluster_id: &str,
    signed_at: SystemTime,
) -> Result<http::Request<()>, TokenError> {
    let identity = credentials.clone().into();

    let mut signing_settings = aws_sigv4::http_request::SigningSettings::default();
    signing_settings.signature_location = aws_sigv4::http_request::SignatureLocation::QueryParams;
    signing_settings.expires_in = Some(Duration::from_secs(PRESIGN_EXPIRES_SECS));
    let signing_params = aws_sigv4::sign::v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name("sts")
        .time(signed_at)
        .settings(signing_settings)
        .build()
        .map_err(|source| TokenError::FailedToBuildSigningParams { source })?
        .into();

    let uri = caller_identity_uri(region);

    let mut request = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header(CLUSTER_ID_HEADER, cluster_id)
        .body(())
        .map_err(|source| TokenError::FailedToBuildHttpRequest { source })?;

    let signing_instructions = {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| Ok((name.as_str(), value.to_str()?)))
            .collect::<Result<Vec<_>, http::header::ToStrError>>()
            .map_err(|source| TokenError::NonAsciiHeader { source })?;

        let signable_request = aws_sigv4::http_request::SignableRequest::new(
            "GET",
            uri,
            headers.into_iter(),
            aws_sigv4::http_request::SignableBody::Bytes(&[]),
        )
        .map_err(|source| TokenError::FailedToCreateSignableRequest { source })?;

        let (signing_instructions, _signature) =
            aws_sigv4::http_request::sign(signable_request, &signing_params)
                .map_err(|source| TokenError::FailedToSignHttpRequest { source })?
                .into_parts();
        signing_instructions
    };

    signing_instructions.apply_to_request_http1x(&mut request);
    Ok(request)
}

/// Mints a token as of `signed_at`.
pub fn mint_token_at(
    credentials: &Credentials,
    region: &str,
    cluster_id: &str,
    signed_at: DateTime<Utc>,
) -> Result<MintedToken, TokenError> {
    let request = presign_caller_identity(credentials, region, cluster_id, signed_at.into())?;

    let token = format!(
        "{TOKEN_PREFIX}{}",
        URL_SAFE_NO_PAD.encode(request.uri().to_string())
    );
    debug!(
        cluster_id,
        token = %mask_secret(&token),
        "minted EKS authentication token"
    );

    Ok(MintedToken {
        cluster_id: cluster_id.to_string(),
        token,
        signed_at,
    })
}

pub fn mint_token(
    credentials: &Credentials,
    region: &str,
    cluster_id: &str,
) -> Result<MintedToken, TokenError> {
    mint_token_at(credentials, region, cluster_id, Utc::now())
}

pub fn exec_credential_json(token: &MintedToken) -> Result<String, TokenError> {
    serde_json::to_string(&token.exec_credential())
        .map_err(|source| TokenError::FailedToSerializeToken { source })
}

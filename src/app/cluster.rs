use aws_credential_types::Credentials;
use aws_sdk_eks::operation::describe_cluster::DescribeClusterError;
use aws_types::SdkConfig;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to describe EKS cluster {name}: {source}")]
    Describe {
        name: String,
        source: aws_sdk_eks::error::SdkError<DescribeClusterError>,
    },

    #[error("EKS did not return a {field} for cluster {name}")]
    MissingField { name: String, field: &'static str },

    #[error("Certificate authority data of cluster {name} is not valid base64: {source}")]
    InvalidCertificateAuthority {
        name: String,
        source: base64::DecodeError,
    },
}

/// What a client needs to reach a cluster's API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFacts {
    pub name: String,
    pub endpoint: String,
    pub certificate_authority: Vec<u8>,
}

impl ClusterFacts {
    /// Builds facts from the base64 CA text EKS hands out.
    pub fn from_encoded(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        certificate_authority_data: &str,
    ) -> Result<Self, ClusterError> {
        let name = name.into();
        let certificate_authority = STANDARD
            .decode(certificate_authority_data.trim())
            .map_err(|source| ClusterError::InvalidCertificateAuthority {
                name: name.clone(),
                source,
            })?;

        Ok(ClusterFacts {
            name,
            endpoint: endpoint.into(),
            certificate_authority,
        })
    }
}

fn from_described(
    requested: &str,
    cluster: Option<&aws_sdk_eks::types::Cluster>,
) -> Result<ClusterFacts, ClusterError> {
    let missing = |field| ClusterError::MissingField {
        name: requested.to_string(),
        field,
    };

    let cluster = cluster.ok_or_else(|| missing("cluster description"))?;
    let name = cluster.name().ok_or_else(|| missing("name"))?;
    let endpoint = cluster.endpoint().ok_or_else(|| missing("endpoint"))?;
    let ca_data = cluster
        .certificate_authority()
        .and_then(|ca| ca.data())
        .ok_or_else(|| missing("certificate authority"))?;

    ClusterFacts::from_encoded(name, endpoint, ca_data)
}

/// Describes `name` through the EKS API using the resolved credentials.
pub async fn describe_cluster(
    shared_config: &SdkConfig,
    credentials: &Credentials,
    name: &str,
) -> Result<ClusterFacts, ClusterError> {
    debug!(cluster = name, "describing EKS cluster");

    let config = aws_sdk_eks::config::Builder::from(shared_config)
        .credentials_provider(credentials.clone())
        .build();
    let output = aws_sdk_eks::Client::from_conf(config)
        .describe_cluster()
        .name(name)
        .send()
        .await
        .map_err(|source| ClusterError::Describe {
            name: name.to_string(),
            source,
        })?;

    let facts = from_described(name, output.cluster())?;
    info!(cluster = %facts.name, endpoint = %facts.endpoint, "found EKS cluster");
    Ok(facts)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::loopback::{sdk_config, serve, static_credentials, Canned, DESCRIBED_DEMO};
    use aws_sdk_eks::types::{Certificate, Cluster};

    #[test]
    fn certificate_authority_round_trips_exact_bytes() {
        let original: Vec<u8> = (0u8..=255).collect();
        let encoded = STANDARD.encode(&original);

        let facts = ClusterFacts::from_encoded("demo", "https://demo.example", &encoded).unwrap();
        assert_eq!(facts.certificate_authority, original);
        assert_eq!(STANDARD.encode(&facts.certificate_authority), encoded);
    }

    #[test]
    fn invalid_certificate_authority_is_fatal() {
        let err = ClusterFacts::from_encoded("demo", "https://demo.example", "not base64!")
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::InvalidCertificateAuthority { name, .. } if name == "demo"
        ));
    }

    #[test]
    fn maps_described_cluster() {
        let cluster = Cluster::builder()
            .name("demo")
            .endpoint("https://demo.example")
            .certificate_authority(Certificate::builder().data(STANDARD.encode("CERT")).build())
            .build();

        let facts = from_described("demo", Some(&cluster)).unwrap();
        assert_eq!(
            facts,
            ClusterFacts {
                name: "demo".to_string(),
                endpoint: "https://demo.example".to_string(),
                certificate_authority: b"CERT".to_vec(),
            }
        );
    }

    #[test]
    fn incomplete_descriptions_are_rejected() {
        let no_endpoint = Cluster::builder()
            .name("demo")
            .certificate_authority(Certificate::builder().data(STANDARD.encode("CERT")).build())
            .build();
        assert!(matches!(
            from_described("demo", Some(&no_endpoint)),
            Err(ClusterError::MissingField { field: "endpoint", .. })
        ));

        let no_ca = Cluster::builder()
            .name("demo")
            .endpoint("https://demo.example")
            .build();
        assert!(matches!(
            from_described("demo", Some(&no_ca)),
            Err(ClusterError::MissingField {
                field: "certificate authority",
                ..
            })
        ));

        assert!(matches!(
            from_described("demo", None),
            Err(ClusterError::MissingField { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn describes_cluster_through_the_eks_api() {
        let (base, seen) = serve(vec![Canned::json("200 OK", DESCRIBED_DEMO)]).await;

        let facts = describe_cluster(&sdk_config(&base), &static_credentials(), "demo")
            .await
            .unwrap();
        assert_eq!(facts.name, "demo");
        assert_eq!(facts.endpoint, "https://demo.example");
        assert_eq!(facts.certificate_authority, b"CERT".to_vec());

        let requests = seen.lock().unwrap();
        assert!(requests[0].starts_with("GET /clusters/demo "), "{}", requests[0]);
        assert!(requests[0].to_lowercase().contains("authorization: aws4-hmac-sha256"));
    }

    #[test_log::test(tokio::test)]
    async fn unknown_cluster_is_fatal() {
        let (base, _) = serve(vec![Canned::json(
            "404 Not Found",
            r#"{"message":"No cluster found for name: demo."}"#,
        )
        .header("x-amzn-errortype", "ResourceNotFoundException")])
        .await;

        let err = describe_cluster(&sdk_config(&base), &static_credentials(), "demo")
            .await
            .unwrap_err();
        match err {
            ClusterError::Describe { name, source } => {
                assert_eq!(name, "demo");
                assert!(source
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn access_denied_is_fatal() {
        let (base, seen) = serve(vec![Canned::json(
            "403 Forbidden",
            r#"{"message":"User is not authorized to perform: eks:DescribeCluster"}"#,
        )
        .header("x-amzn-errortype", "AccessDeniedException")])
        .await;

        let err = describe_cluster(&sdk_config(&base), &static_credentials(), "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Describe { name, .. } if name == "demo"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

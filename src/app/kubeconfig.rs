//! Client configuration (kubeconfig) documents for a single EKS cluster.
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use super::cluster::ClusterFacts;
use super::token::MintedToken;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_OUTPUT_FILE: &str = "kubeconfig.yaml";

#[derive(Error, Debug)]
pub enum KubeconfigError {
    #[error("Token was minted for cluster {token_cluster} but the cluster description is for {described_cluster}. The authenticator would reject it.")]
    ClusterMismatch {
        token_cluster: String,
        described_cluster: String,
    },

    #[error("Failed to serialize kubeconfig: {source}")]
    Serialize { source: serde_yaml::Error },

    #[error("Failed to write kubeconfig to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub contexts: Vec<NamedContext>,
    pub users: Vec<NamedAuthInfo>,
    #[serde(rename = "current-context")]
    pub current_context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: Cluster,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cluster {
    pub server: String,
    #[serde(with = "base64_bytes")]
    pub certificate_authority_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamedContext {
    pub name: String,
    pub context: Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Context {
    pub cluster: String,
    pub namespace: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamedAuthInfo {
    pub name: String,
    pub user: AuthInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthInfo {
    pub token: String,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

/// Builds a document with one cluster/context/user triple named after the
/// cluster. Refuses tokens bound to a different cluster than `facts`.
pub fn assemble(facts: &ClusterFacts, token: &MintedToken) -> Result<Kubeconfig, KubeconfigError> {
    if facts.name != token.cluster_id {
        return Err(KubeconfigError::ClusterMismatch {
            token_cluster: token.cluster_id.clone(),
            described_cluster: facts.name.clone(),
        });
    }

    let name = facts.name.clone();
    Ok(Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: name.clone(),
            cluster: Cluster {
                server: facts.endpoint.clone(),
                certificate_authority_data: facts.certificate_authority.clone(),
            },
        }],
        contexts: vec![NamedContext {
            name: name.clone(),
            context: Context {
                cluster: name.clone(),
                namespace: DEFAULT_NAMESPACE.to_string(),
                user: name.clone(),
            },
        }],
        users: vec![NamedAuthInfo {
            name: name.clone(),
            user: AuthInfo {
                token: token.token.clone(),
            },
        }],
        current_context: name,
    })
}

impl Kubeconfig {
    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        serde_yaml::to_string(self).map_err(|source| KubeconfigError::Serialize { source })
    }

    pub async fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), KubeconfigError> {
        let path = path.as_ref();
        let yaml = self.to_yaml()?;
        tokio::fs::write(path, yaml)
            .await
            .map_err(|source| KubeconfigError::Write {
                path: path.display().to_string(),
                source,
            })?;
        info!(path = %path.display(), context = %self.current_context, "wrote kubeconfig");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::token::TOKEN_PREFIX;
    use chrono::Utc;

    fn demo_facts() -> ClusterFacts {
        ClusterFacts {
            name: "demo".to_string(),
            endpoint: "https://demo.example".to_string(),
            certificate_authority: b"CERT".to_vec(),
        }
    }

    fn demo_token(cluster_id: &str) -> MintedToken {
        MintedToken {
            cluster_id: cluster_id.to_string(),
            token: format!("{TOKEN_PREFIX}aHR0cHM6Ly9zdHMuZXUtd2VzdC0xLmFtYXpvbmF3cy5jb20v"),
            signed_at: Utc::now(),
        }
    }

    #[test]
    fn assembles_single_cluster_document() {
        let config = assemble(&demo_facts(), &demo_token("demo")).unwrap();

        assert_eq!(config.current_context, "demo");
        assert_eq!(config.clusters.len(), 1);
        assert_eq!(config.clusters[0].name, "demo");
        assert_eq!(config.clusters[0].cluster.server, "https://demo.example");
        assert_eq!(config.clusters[0].cluster.certificate_authority_data, b"CERT");

        assert_eq!(config.contexts.len(), 1);
        assert_eq!(
            config.contexts[0].context,
            Context {
                cluster: "demo".to_string(),
                namespace: "default".to_string(),
                user: "demo".to_string(),
            }
        );

        assert_eq!(config.users.len(), 1);
        assert!(config.users[0].user.token.starts_with(TOKEN_PREFIX));
    }

    #[test]
    fn rejects_token_for_another_cluster() {
        let err = assemble(&demo_facts(), &demo_token("other")).unwrap_err();
        assert!(matches!(
            err,
            KubeconfigError::ClusterMismatch { token_cluster, described_cluster }
                if token_cluster == "other" && described_cluster == "demo"
        ));
    }

    #[test]
    fn yaml_uses_kubeconfig_field_names() {
        let yaml = assemble(&demo_facts(), &demo_token("demo"))
            .unwrap()
            .to_yaml()
            .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["apiVersion"].as_str(), Some("v1"));
        assert_eq!(doc["kind"].as_str(), Some("Config"));
        assert_eq!(doc["current-context"].as_str(), Some("demo"));

        let cluster = &doc["clusters"][0]["cluster"];
        assert_eq!(cluster["server"].as_str(), Some("https://demo.example"));
        assert_eq!(cluster["certificate-authority-data"].as_str(), Some("Q0VSVA=="));

        assert_eq!(doc["contexts"][0]["context"]["namespace"].as_str(), Some("default"));
        assert_eq!(doc["contexts"][0]["context"]["user"].as_str(), Some("demo"));
        assert!(doc["users"][0]["user"]["token"]
            .as_str()
            .unwrap()
            .starts_with(TOKEN_PREFIX));
    }

    #[test]
    fn yaml_round_trips_certificate_bytes() {
        let mut facts = demo_facts();
        facts.certificate_authority = (0u8..=255).rev().collect();
        let config = assemble(&facts, &demo_token("demo")).unwrap();

        let parsed: Kubeconfig = serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(
            parsed.clusters[0].cluster.certificate_authority_data,
            facts.certificate_authority
        );
    }

    #[test_log::test(tokio::test)]
    async fn writes_document_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_OUTPUT_FILE);
        let config = assemble(&demo_facts(), &demo_token("demo")).unwrap();

        config.write_to(&path).await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let parsed: Kubeconfig = serde_yaml::from_str(&written).unwrap();
        assert_eq!(parsed, config);
    }

    #[test_log::test(tokio::test)]
    async fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join(DEFAULT_OUTPUT_FILE);
        let config = assemble(&demo_facts(), &demo_token("demo")).unwrap();

        let err = config.write_to(&path).await.unwrap_err();
        assert!(matches!(err, KubeconfigError::Write { .. }));
    }
}

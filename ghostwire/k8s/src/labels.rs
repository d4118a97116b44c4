use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::{Api, Client, Pod};

/// Reads one label from the owning entity. A missing label is an empty
/// string, not an error, so callers can treat absence as a state.
#[async_trait]
pub trait LabelReader: Send + Sync {
    async fn get_label(&self, key: &str) -> Result<String>;
}

/// Reads labels from a pod through the cluster API. The pod's service
/// account needs RBAC permission to get its own Pod object.
pub struct PodLabels {
    api: Api<Pod>,
    namespace: String,
    name: String,
}

impl PodLabels {
    pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let api = Api::namespaced(client, &namespace);
        Self {
            api,
            namespace,
            name: name.into(),
        }
    }
}

#[async_trait]
impl LabelReader for PodLabels {
    async fn get_label(&self, key: &str) -> Result<String> {
        let pod = self.api.get(&self.name).await.with_context(|| {
            format!("get pod {}/{} for label {key:?}", self.namespace, self.name)
        })?;
        Ok(pod
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .cloned()
            .unwrap_or_default())
    }
}

//! The capability object threaded through every component call.

use std::fmt;
use std::sync::Arc;

use crate::api::Cluster;
use crate::config::VerifyConfig;

/// Cluster handle, namespace and configuration for a verification run.
///
/// Cheap to clone: concurrent scenarios each hold their own copy and share
/// the underlying cluster.
#[derive(Clone)]
pub struct VerifyContext {
    cluster: Arc<dyn Cluster>,
    namespace: String,
    config: Arc<VerifyConfig>,
}

impl VerifyContext {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        namespace: impl Into<String>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            config: Arc::new(config),
        }
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// A generated, collision-free object name: `<prefix>-<8 hex chars>`.
    pub fn generate_name(&self, prefix: &str) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("{prefix}-{}", &id[..8])
    }
}

impl fmt::Debug for VerifyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyContext")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Read-only evidence providers.
//!
//! Each provider is a plain client struct with a `Config` that can be
//! pointed at a test server. `Providers` bundles them for injection into
//! the pipeline and the tool executor, keeping tests hermetic.

pub mod argocd;
pub mod aws;
pub mod catalog;
pub mod github;
pub mod k8s;
pub mod logs;
pub mod prom;

use std::sync::Arc;

pub use argocd::{ArgoCdClient, ArgoCdConfig};
pub use catalog::ServiceCatalog;
pub use github::{GithubClient, GithubConfig, RepoResolution};
pub use k8s::K8sClient;
pub use logs::{LogsClient, LogsConfig, LogsFetchResult};
pub use prom::{PromClient, PromConfig};

/// The provider bundle injected into collectors and the tool executor.
#[derive(Clone)]
pub struct Providers {
    pub prom: Arc<PromClient>,
    pub k8s: Arc<K8sClient>,
    pub logs: Arc<LogsClient>,
    pub aws: Arc<aws::AwsClients>,
    pub github: Option<Arc<GithubClient>>,
    pub argocd: Option<Arc<ArgoCdClient>>,
}

impl Providers {
    /// Build the default provider set from environment configuration.
    pub async fn from_env() -> anyhow::Result<Self> {
        let github = GithubClient::from_env().map(Arc::new);
        let argocd = ArgoCdConfig::from_env().map(|cfg| Arc::new(ArgoCdClient::new(cfg)));
        Ok(Self {
            prom: Arc::new(PromClient::new(PromConfig::from_env())),
            k8s: Arc::new(K8sClient::new()),
            logs: Arc::new(LogsClient::new(LogsConfig::from_env())),
            aws: Arc::new(aws::AwsClients::from_env().await),
            github,
            argocd,
        })
    }
}

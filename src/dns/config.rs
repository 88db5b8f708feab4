use kubedns_resolver::{ResolverConfig, TtlConfig};

#[derive(Debug, serde::Deserialize)]
pub struct Config {
    /// Middleware pass-through switch; `false` means no registry is
    /// built and every query is immediately deferred.
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,
    #[serde(default = "Config::default_cluster_domain")]
    pub cluster_domain: String,
    #[serde(default)]
    pub ttl: TtlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            cluster_domain: Self::default_cluster_domain(),
            ttl: TtlConfig::default(),
        }
    }
}

impl Config {
    fn default_enabled() -> bool {
        true
    }

    fn default_cluster_domain() -> String {
        "cluster.local".into()
    }
}

impl Config {
    /// `cluster_domain` is warned about, not rejected, when it carries
    /// neither a `.local` nor a `.cluster` tail — most clusters use
    /// `cluster.local`, but nothing stops an operator from picking
    /// something else entirely.
    pub fn resolver_config(&self) -> ResolverConfig {
        if !self.cluster_domain.ends_with(".local") && !self.cluster_domain.ends_with(".cluster") {
            tracing::warn!(
                cluster_domain = %self.cluster_domain,
                "cluster domain does not end in .local or .cluster"
            );
        }
        ResolverConfig {
            cluster_domain: self.cluster_domain.clone(),
            ttl: self.ttl,
        }
    }
}

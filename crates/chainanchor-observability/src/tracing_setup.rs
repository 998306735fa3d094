//! Log subscriber setup for the `chainanchor` binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `log:` section of the node config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default level for every target.
    #[serde(default = "default_level")]
    pub level: String,
    /// Per-crate levels, e.g. `chainanchor-rpc: debug`.
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// One JSON object per line instead of text.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Filter directives, e.g. `"info,chainanchor_rpc=debug"`.
    ///
    /// Components are sorted so the directive string is stable.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();

        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. Call once; an invalid directive string
/// falls back to `info`.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_new(config.directives())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let mut config = LogConfig::default();
        config.components.insert("chainanchor-rpc".into(), "debug".into());
        config.components.insert("chainanchor-indexer".into(), "trace".into());
        assert_eq!(
            config.directives(),
            "info,chainanchor_indexer=trace,chainanchor_rpc=debug"
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: LogConfig = serde_yaml::from_str("json: true").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.components.is_empty());
        assert!(config.json);
    }
}

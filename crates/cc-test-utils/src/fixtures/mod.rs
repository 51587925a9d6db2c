//! Pre-configured test data fixtures for CC testing.
//!
//! Provides:
//! - Environment variable maps accepted by `Config::from_vars`
//! - Endpoint lists for dial and join requests

use std::collections::HashMap;

/// Password used by [`test_config_vars`].
pub const TEST_ARI_PASSWORD: &str = "test-ari-secret";

/// Minimal variable set for a valid configuration.
#[must_use]
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        ("CC_ARI_PASSWORD".to_string(), TEST_ARI_PASSWORD.to_string()),
        ("CC_CONSOLE_ENABLED".to_string(), "false".to_string()),
    ])
}

/// Variable set pointing the ARI client at `base_url` (e.g. a mock server).
#[must_use]
pub fn test_config_vars_for(base_url: &str) -> HashMap<String, String> {
    let mut vars = test_config_vars();
    vars.insert("CC_ARI_URL".to_string(), format!("{base_url}/ari"));
    vars.insert(
        "CC_ARI_WS_URL".to_string(),
        format!("{}/ari/events", base_url.replacen("http", "ws", 1)),
    );
    vars
}

/// Builder for endpoint lists.
#[derive(Debug, Clone)]
pub struct TestEndpoints {
    count: usize,
    technology: Option<String>,
    first_extension: u32,
}

impl TestEndpoints {
    /// `count` endpoints starting at extension 5000.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            count,
            technology: Some("PJSIP".to_string()),
            first_extension: 5000,
        }
    }

    /// Start numbering at `extension`.
    #[must_use]
    pub fn starting_at(mut self, extension: u32) -> Self {
        self.first_extension = extension;
        self
    }

    /// Emit bare extensions without a technology prefix.
    #[must_use]
    pub fn bare(mut self) -> Self {
        self.technology = None;
        self
    }

    /// Use `technology` as the prefix.
    #[must_use]
    pub fn with_technology(mut self, technology: impl Into<String>) -> Self {
        self.technology = Some(technology.into());
        self
    }

    /// Build the raw endpoint strings.
    #[must_use]
    pub fn build(&self) -> Vec<String> {
        (0..self.count)
            .map(|i| {
                let extension = self.first_extension + i as u32;
                match &self.technology {
                    Some(technology) => format!("{technology}/{extension}"),
                    None => extension.to_string(),
                }
            })
            .collect()
    }
}

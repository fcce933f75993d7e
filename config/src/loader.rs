use crate::{ConfigError, ConnectorConfig};
use regex::Regex;
use std::path::PathBuf;

pub struct ConfigLoader {
    explicit_file: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            search_paths.push(home.join(".config/oura-connector/config.yaml"));
        }
        search_paths.push(PathBuf::from("./oura-connector.yaml"));

        #[cfg(unix)]
        search_paths.insert(0, PathBuf::from("/etc/oura-connector/config.yaml"));

        Self {
            explicit_file: None,
            search_paths,
        }
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.explicit_file = Some(PathBuf::from(path));
        self
    }

    pub fn load(&self) -> Result<ConnectorConfig, ConfigError> {
        let mut config = ConnectorConfig::default();

        if let Some(ref explicit) = self.explicit_file {
            config = self.parse_file(explicit)?;
        } else if let Ok(env_path) = std::env::var("OURA_CONNECTOR_CONFIG") {
            config = self.parse_file(&PathBuf::from(env_path))?;
        } else {
            // Later files win; only the last existing file is used as a whole.
            for path in &self.search_paths {
                if path.exists() {
                    tracing::debug!(path = %path.display(), "Reading connector config");
                    config = self.parse_file(path)?;
                }
            }
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn parse_file(&self, path: &PathBuf) -> Result<ConnectorConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        self.parse_yaml(&content)
    }

    fn parse_yaml(&self, content: &str) -> Result<ConnectorConfig, ConfigError> {
        let expanded = expand_env_vars(content);
        Ok(serde_yaml::from_str(&expanded)?)
    }

    fn apply_env_overrides(&self, config: &mut ConnectorConfig) {
        if let Some(url) = non_empty_env("OURA_REPOSITORY_URL") {
            config.repository.url = url;
        }
        if let Some(url) = non_empty_env("OURA_REPOSITORY_TOKEN_URL") {
            config.repository.token_url = Some(url);
        }
        // The management portal variables are shared with the other RADAR connectors.
        if let Some(id) =
            non_empty_env("OURA_REPOSITORY_CLIENT_ID").or_else(|| non_empty_env("MANAGEMENT_PORTAL_CLIENT_ID"))
        {
            config.repository.client_id = Some(id);
        }
        if let Some(secret) = non_empty_env("OURA_REPOSITORY_CLIENT_SECRET")
            .or_else(|| non_empty_env("MANAGEMENT_PORTAL_CLIENT_SECRET"))
        {
            config.repository.client_secret = Some(secret);
        }
        if let Some(users) = non_empty_env("OURA_USERS") {
            config.users = users
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(level) = std::env::var("OURA_LOG_LEVEL") {
            if let Ok(l) = serde_yaml::from_str(&level) {
                config.logging.level = l;
            }
        }
        if let Some(listen) = non_empty_env("OURA_METRICS_LISTEN") {
            config.metrics.enabled = true;
            config.metrics.listen = listen;
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn expand_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".gatorconfig.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_url: String,
    /// Empty until someone registers or logs in
    #[serde(default)]
    pub current_user_name: String,
}

fn default_db_url() -> String {
    db_url_in(&dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")))
}

/// `sqlite:<base>/gator/gator.db`, creating the `gator` directory on the way.
fn db_url_in(base: &Path) -> String {
    let data_dir = base.join("gator");
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::warn!(path = %data_dir.display(), error = %e, "Failed to create data directory");
    }
    format!("sqlite:{}", data_dir.join("gator.db").display())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: default_db_url(),
            current_user_name: String::new(),
        }
    }
}

impl Config {
    /// `~/.gatorconfig.json`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine the home directory")?;
        Ok(home.join(CONFIG_FILE_NAME))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = Self::from_str(&content)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        Ok(config)
    }

    /// Loads the config at `path`, writing a default one first if it is missing.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        let config = Config::default();
        config.save(path)?;
        tracing::info!(path = %path.display(), "Created default config file");
        Ok(config)
    }

    /// Parse config from a JSON string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Rewrites the whole file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write config file '{}'", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to restrict config file permissions");
            }
        }

        Ok(())
    }

    pub fn set_user<P: AsRef<Path>>(&mut self, name: &str, path: P) -> anyhow::Result<()> {
        self.current_user_name = name.to_string();
        self.save(path)
    }

    /// The logged-in user's name, if any.
    pub fn current_user(&self) -> Option<&str> {
        if self.current_user_name.is_empty() {
            None
        } else {
            Some(&self.current_user_name)
        }
    }
}

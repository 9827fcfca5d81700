use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    /// Resolve the base directory: `$KEYSTONE_HOME` if set, else `~/.keystone`.
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("KEYSTONE_HOME") {
            if !home.trim().is_empty() {
                return Self { base: PathBuf::from(home) };
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".keystone"))
            .unwrap_or_else(|| PathBuf::from(".keystone"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

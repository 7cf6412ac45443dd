use directories::BaseDirs;
use std::path::PathBuf;

pub struct PathManager;

impl PathManager {
    pub fn data_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|d| d.data_dir().join("murmur"))
    }

    pub fn config_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|d| d.config_dir().join("murmur"))
    }

    pub fn cache_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|d| d.cache_dir().join("murmur"))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.toml"))
    }

    pub fn logs_dir() -> Option<PathBuf> {
        // On macOS, logs usually go to ~/Library/Logs/
        #[cfg(target_os = "macos")]
        {
            if let Some(dirs) = directories::UserDirs::new() {
                return Some(dirs.home_dir().join("Library/Logs/Murmur"));
            }
        }
        Self::data_dir().map(|d| d.join("logs"))
    }

    pub fn log_file_path() -> Option<PathBuf> {
        Self::logs_dir().map(|d| d.join("murmur.log"))
    }

    pub fn ensure_dirs_exist() -> std::io::Result<()> {
        if let Some(d) = Self::data_dir() {
            std::fs::create_dir_all(&d)?;
        }
        if let Some(d) = Self::config_dir() {
            std::fs::create_dir_all(&d)?;
        }
        if let Some(d) = Self::logs_dir() {
            std::fs::create_dir_all(&d)?;
        }
        Ok(())
    }
}

use std::path::{Path, PathBuf};

const ENV_CONFIG: &str = "SCANFLEET_CONFIG";
const ENV_WORKER_BIN: &str = "SCANFLEET_WORKER_BIN";
const ENV_HOST: &str = "SCANFLEET_HOST";

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const SCANFLEET_SUBDIR: &str = "scanfleet";
const DEFAULT_WORKER_BIN: &str = "naps2";

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// scanfleet config directory (~/.config/scanfleet)
pub fn config_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
        .join(SCANFLEET_SUBDIR);
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Fleet config file ($SCANFLEET_CONFIG or ~/.config/scanfleet/fleet.toml)
pub fn config_path() -> PathBuf {
    let path = config_path_override().unwrap_or_else(|| config_dir().join("fleet.toml"));
    tracing::trace!(path = %path.display(), "Fleet config path");
    path
}

/// Explicit fleet config file from $SCANFLEET_CONFIG
pub fn config_path_override() -> Option<PathBuf> {
    env_opt(ENV_CONFIG).map(PathBuf::from)
}

/// Worker binary override ($SCANFLEET_WORKER_BIN)
pub fn worker_binary_override() -> Option<String> {
    let val = env_opt(ENV_WORKER_BIN);
    tracing::trace!(value = ?val, "SCANFLEET_WORKER_BIN env var");
    val
}

/// Worker binary used when neither config nor env provide one
pub fn default_worker_binary() -> String {
    DEFAULT_WORKER_BIN.to_string()
}

/// Bind host override ($SCANFLEET_HOST)
pub fn host_override() -> Option<String> {
    let val = env_opt(ENV_HOST);
    tracing::trace!(value = ?val, "SCANFLEET_HOST env var");
    val
}

/// scanfleet data directory (~/.local/share/scanfleet)
pub fn data_dir() -> PathBuf {
    let dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
        .join(SCANFLEET_SUBDIR);
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Output file for a launched worker (~/.local/share/scanfleet/logs/<name>.log)
pub fn worker_log_path(name: &str) -> PathBuf {
    data_dir().join("logs").join(format!("{}.log", name))
}

/// Expand a leading `~` to the user's home directory.
///
/// Only a bare `~` or a `~/` prefix is expanded; `~user` forms are left untouched.
/// If the home directory cannot be determined the path is returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(path);
    };
    expand_home_with(path, &home)
}

fn expand_home_with(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_home_prefix() {
        let home = Path::new("/home/scanner");
        assert_eq!(
            expand_home_with("~/naps2-client01", home),
            PathBuf::from("/home/scanner/naps2-client01")
        );
        assert_eq!(expand_home_with("~", home), PathBuf::from("/home/scanner"));
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        let home = Path::new("/home/scanner");
        assert_eq!(
            expand_home_with("/srv/naps2", home),
            PathBuf::from("/srv/naps2")
        );
        assert_eq!(expand_home_with("~other/x", home), PathBuf::from("~other/x"));
        assert_eq!(
            expand_home_with("data/~/x", home),
            PathBuf::from("data/~/x")
        );
    }

    #[test]
    fn test_worker_log_path() {
        let path = worker_log_path("client01");
        assert!(path.ends_with("scanfleet/logs/client01.log"));
    }
}

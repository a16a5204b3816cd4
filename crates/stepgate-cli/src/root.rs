use std::path::{Path, PathBuf};

/// File picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "stepgate.yaml";

/// Resolve the configuration file to load.
///
/// Priority:
/// 1. `--config` flag / `STEPGATE_CONFIG` env var (passed in as `explicit`)
/// 2. `stepgate.yaml` in the current directory, if present
/// 3. None: defaults plus `STEPGATE_*` variables only
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    let cwd = std::env::current_dir().ok()?;
    let candidate = cwd.join(DEFAULT_CONFIG_FILE);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/etc/stepgate/custom.yaml");
        assert_eq!(resolve_config_path(Some(p)), Some(p.to_path_buf()));
    }
}

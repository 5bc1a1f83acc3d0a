pub mod error;
pub mod settings;

pub use error::*;
pub use settings::*;

use std::path::PathBuf;

const CANDIDATES: [&str; 4] = [
    "cluster.local.kdl",
    ".cluster.local.kdl",
    "cluster.kdl",
    ".cluster.kdl",
];

/// ClusterFlow config directory (`~/.config/clusterflow`), created on demand
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("clusterflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the cluster definition.
///
/// Search order:
/// 1. `CLUSTERFLOW_CONFIG_PATH`
/// 2. current directory: cluster.local.kdl, .cluster.local.kdl, cluster.kdl, .cluster.kdl
/// 3. `./.clusterflow/`, same order
/// 4. `~/.config/clusterflow/cluster.kdl`
pub fn find_cluster_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var("CLUSTERFLOW_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".clusterflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("clusterflow").join("cluster.kdl");
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::ClusterFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("clusterflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("cluster.kdl"), "// test").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset("CLUSTERFLOW_CONFIG_PATH", find_cluster_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("cluster.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_local_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("cluster.kdl"), "// shared").unwrap();
        fs::write(temp_dir.path().join("cluster.local.kdl"), "// local").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset("CLUSTERFLOW_CONFIG_PATH", find_cluster_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("cluster.local.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_in_project_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::create_dir(temp_dir.path().join(".clusterflow")).unwrap();
        fs::write(temp_dir.path().join(".clusterflow/cluster.kdl"), "// test").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset("CLUSTERFLOW_CONFIG_PATH", find_cluster_file);
        std::env::set_current_dir(original_dir).unwrap();

        let path = result.unwrap();
        assert!(path.ends_with(".clusterflow/cluster.kdl"));
    }

    #[test]
    #[serial]
    fn test_find_cluster_file_from_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("prod.kdl");
        fs::write(&custom, "// custom").unwrap();

        let result = temp_env::with_var(
            "CLUSTERFLOW_CONFIG_PATH",
            Some(custom.to_str().unwrap()),
            find_cluster_file,
        );

        assert_eq!(result.unwrap(), custom);
    }
}

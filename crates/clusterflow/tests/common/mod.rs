use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A Sakura Cloud cluster that validates without credentials
#[allow(dead_code)]
pub const SAKURA_CLUSTER: &str = r#"
cluster "demo" {
    cloud "sakura"
    location "is1a"
    kubernetes-version "1.29.0"

    key-pair "admin" {
        public-key "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAITest admin@example"
    }

    network "n1" {
        cidr "10.10.0.0/16"
    }

    firewall "fw" {
        rule protocol="tcp" port=22 source="0.0.0.0/0"
        rule protocol="tcp" port=6443 source="0.0.0.0/0"
    }

    server-pool "master" {
        role "master"
        count 1
        size "2core-4gb"
        image "ubuntu"
        bootstrap "sakura_k8s_ubuntu_master"
        key-pair "admin"
        network "n1"
        firewalls "fw"
    }

    server-pool "workers" {
        role "node"
        count 2
        size "2core-4gb"
        image "ubuntu"
        bootstrap "sakura_k8s_ubuntu_node"
        key-pair "admin"
        network "n1"
        firewalls "fw"
    }
}
"#;

/// Isolated working directory, config home and state directory
pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write_cluster_kdl(&self, content: &str) {
        fs::write(self.root.path().join("cluster.kdl"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state")
    }

    /// `clusterflow` running inside the project, blind to the real user's
    /// config, state and credentials
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("clusterflow").unwrap();
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("CLUSTERFLOW_STATE_DIR", self.state_dir())
            .env_remove("CLUSTERFLOW_CONFIG_PATH")
            .env_remove("CLUSTERFLOW_CONCURRENCY")
            .env_remove("DIGITALOCEAN_TOKEN")
            .env_remove("SAKURA_ZONE")
            .env_remove("RUST_LOG");
        cmd
    }
}

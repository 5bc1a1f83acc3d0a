use super::*;
use crate::model::{NodeRole, ResourceKind, ResourceSpec};

const FULL: &str = r#"
cluster "demo" {
    cloud "digitalocean"
    location "nyc3"
    kubernetes-version "1.29.0"

    key-pair "admin" {
        public-key "ssh-ed25519 AAAAC3 demo@example"
    }

    network "net" {
        cidr "10.10.0.0/16"
    }

    firewall "fw" {
        rule protocol="tcp" port=22 source="0.0.0.0/0"
        rule port=6443
    }

    server-pool "master" {
        role "master"
        count 1
        size "s-2vcpu-4gb"
        image "ubuntu-22-04-x64"
        bootstrap "digitalocean_k8s_ubuntu_master"
        key-pair "admin"
        network "net"
        firewalls "fw"
    }

    server-pool "workers" {
        count 3
        size "s-2vcpu-2gb"
        image "ubuntu-22-04-x64"
        bootstrap "digitalocean_k8s_ubuntu_node"
        key-pair "admin"
        network "net"
        firewalls "fw"
    }

    load-balancer "ingress" {
        pool "workers"
        forward entry=80 target=30080
        forward entry=443
    }
}
"#;

#[test]
fn test_parse_full_cluster() {
    let cluster = parse_cluster_string(FULL).unwrap();

    assert_eq!(cluster.name, "demo");
    assert_eq!(cluster.cloud, CloudKind::DigitalOcean);
    assert_eq!(cluster.location, "nyc3");
    assert_eq!(cluster.kubernetes_version, "1.29.0");
    assert_eq!(
        cluster.resource_names(),
        vec!["admin", "net", "fw", "master", "workers", "ingress"]
    );
    assert_eq!(cluster.resource("fw").unwrap().kind(), ResourceKind::Firewall);
}

#[test]
fn test_parse_server_pool_fields() {
    let cluster = parse_cluster_string(FULL).unwrap();
    let workers = cluster.resource("workers").unwrap().as_server_pool().unwrap();

    assert_eq!(workers.role, NodeRole::Node);
    assert_eq!(workers.count, 3);
    assert_eq!(workers.size, "s-2vcpu-2gb");
    assert_eq!(workers.key_pair.as_deref(), Some("admin"));
    assert_eq!(workers.firewalls, vec!["fw"]);

    let master = cluster.resource("master").unwrap().as_server_pool().unwrap();
    assert_eq!(master.role, NodeRole::Master);
}

#[test]
fn test_parse_rule_defaults() {
    let cluster = parse_cluster_string(FULL).unwrap();
    let ResourceSpec::Firewall(fw) = &cluster.resource("fw").unwrap().spec else {
        panic!("fw is not a firewall");
    };

    assert_eq!(fw.rules.len(), 2);
    assert_eq!(fw.rules[1].protocol, "tcp");
    assert_eq!(fw.rules[1].port, 6443);
    assert_eq!(fw.rules[1].source, "0.0.0.0/0");
}

#[test]
fn test_parse_forward_target_defaults_to_entry() {
    let cluster = parse_cluster_string(FULL).unwrap();
    let ResourceSpec::LoadBalancer(lb) = &cluster.resource("ingress").unwrap().spec else {
        panic!("ingress is not a load balancer");
    };

    assert_eq!(lb.forwarding[0].target_port, 30080);
    assert_eq!(lb.forwarding[1].entry_port, 443);
    assert_eq!(lb.forwarding[1].target_port, 443);
}

#[test]
fn test_parse_depends_on() {
    let kdl = r#"
        cluster "demo" {
            cloud "sakura"
            location "is1a"
            kubernetes-version "1.29.0"
            network "a" { cidr "10.0.0.0/16"; }
            network "b" {
                cidr "10.1.0.0/16"
                depends-on "a"
            }
        }
    "#;

    let cluster = parse_cluster_string(kdl).unwrap();
    assert_eq!(cluster.cloud, CloudKind::Sakura);
    assert_eq!(cluster.resource("b").unwrap().depends_on, vec!["a"]);
}

#[test]
fn test_unknown_field_is_rejected() {
    let kdl = r#"
        cluster "demo" {
            cloud "digitalocean"
            location "nyc3"
            kubernetes-version "1.29.0"
            network "net" {
                cidr "10.0.0.0/16"
                colour "blue"
            }
        }
    "#;

    let err = parse_cluster_string(kdl).unwrap_err();
    assert!(err.to_string().contains("colour"), "unexpected error: {err}");
}

#[test]
fn test_unknown_resource_type_is_rejected() {
    let kdl = r#"
        cluster "demo" {
            cloud "digitalocean"
            location "nyc3"
            kubernetes-version "1.29.0"
            database "db" {}
        }
    "#;

    assert!(matches!(
        parse_cluster_string(kdl),
        Err(ClusterError::InvalidConfig(_))
    ));
}

#[test]
fn test_missing_cloud_is_rejected() {
    let kdl = r#"
        cluster "demo" {
            location "nyc3"
            kubernetes-version "1.29.0"
        }
    "#;

    assert!(parse_cluster_string(kdl).is_err());
}

#[test]
fn test_missing_cluster_node() {
    assert!(matches!(
        parse_cluster_string(""),
        Err(ClusterError::InvalidConfig(_))
    ));
}

#[test]
fn test_invalid_kdl() {
    assert!(matches!(
        parse_cluster_string("cluster \"demo\" {"),
        Err(ClusterError::KdlParse(_))
    ));
}

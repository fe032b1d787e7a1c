// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end provisioning scenarios against the mock executor.

use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use moorage_deploy::actions::{DeployLocks, start_database};
use moorage_deploy::compose::{ComposeCommand, ServiceVolume};
use moorage_deploy::database::{
    DatabaseConfig, Destination, Engine, EnvVar, InitScript, PersistentStorage, Server,
};
use moorage_deploy::executor::{MockExecutor, RecordingSink};

const BASE_DIR: &str = "/data/moorage/databases";

fn server() -> Server {
    Server {
        uuid: "srv-1".into(),
        name: "node-1".into(),
        address: "10.0.0.5".into(),
        log_drain_enabled: false,
        is_usable: true,
        is_reachable: true,
        is_swarm_worker: false,
        is_build_server: false,
        team_id: 1,
    }
}

fn base_config(uuid: &str, image: &str, engine: Engine) -> DatabaseConfig {
    DatabaseConfig {
        uuid: uuid.into(),
        name: "primary".into(),
        image: image.into(),
        limits_memory: "0".into(),
        limits_memory_swap: "0".into(),
        limits_memory_swappiness: 60,
        limits_memory_reservation: "0".into(),
        limits_cpus: "1".into(),
        limits_cpu_shares: 1024,
        limits_cpuset: None,
        destination: Destination {
            network: "bridge-net".into(),
            server: server(),
        },
        persistent_storages: vec![],
        ports_mappings: vec![],
        runtime_environment_variables: vec![],
        enable_log_drain: false,
        engine,
    }
}

fn decoded_write(commands: &[String], path_suffix: &str) -> String {
    let command = commands
        .iter()
        .find(|c| c.contains("| base64 -d >") && c.ends_with(path_suffix))
        .unwrap_or_else(|| panic!("no write command for {path_suffix}"));
    let encoded = command
        .strip_prefix("echo '")
        .unwrap()
        .split('\'')
        .next()
        .unwrap();
    String::from_utf8(general_purpose::STANDARD.decode(encoded).unwrap()).unwrap()
}

/// Relational store with one init script and a custom conf: bootstrap
/// directory created, script and conf written, descriptor references both
/// as read-only bind mounts with the array-form startup command, then
/// pull and converge.
#[tokio::test]
async fn relational_store_with_init_script_and_conf() {
    let config = base_config(
        "pg-scn-a",
        "postgres:16",
        Engine::Postgres {
            user: "admin".into(),
            password: "pw".into(),
            db: "app".into(),
            conf: Some("shared_buffers = 256MB\n".into()),
            init_scripts: vec![InitScript {
                filename: "seed.sql".into(),
                content: "CREATE TABLE widgets (id serial);\n".into(),
            }],
        },
    );

    let executor = MockExecutor::new();
    let sink = RecordingSink::new();
    let locks = DeployLocks::new();

    start_database(&config, Path::new(BASE_DIR), "", &executor, &sink, &locks)
        .await
        .unwrap();

    let executed = executor.executed().await;
    assert_eq!(executed.len(), 1);
    let commands = executed[0].1.commands();

    let mkdir_bootstrap = commands
        .iter()
        .position(|c| c == "mkdir -p /data/moorage/databases/pg-scn-a/docker-entrypoint-initdb.d")
        .expect("bootstrap directory created");
    let seed_write = commands
        .iter()
        .position(|c| c.ends_with("docker-entrypoint-initdb.d/seed.sql"))
        .expect("seed.sql written");
    let conf_write = commands
        .iter()
        .position(|c| c.ends_with("pg-scn-a/custom-postgres.conf"))
        .expect("custom conf written");
    let up = commands
        .iter()
        .position(|c| c.ends_with("up -d"))
        .expect("converge command");
    assert!(mkdir_bootstrap < seed_write);
    assert!(seed_write < up);
    assert!(conf_write < up);

    assert_eq!(
        decoded_write(commands, "seed.sql"),
        "CREATE TABLE widgets (id serial);\n"
    );

    // Descriptor: array-form command, both files bound read-only.
    let descriptor = decoded_write(commands, "docker-compose.yml");
    let compose: moorage_deploy::compose::ComposeFile =
        serde_yaml::from_str(&descriptor).unwrap();
    let service = compose.services.get("pg-scn-a").unwrap();
    assert_eq!(
        service.command,
        Some(ComposeCommand::Exec(vec![
            "postgres".into(),
            "-c".into(),
            "config_file=/etc/postgresql/postgresql.conf".into(),
        ]))
    );
    let read_only_targets: Vec<&str> = service
        .volumes
        .iter()
        .filter_map(|v| match v {
            ServiceVolume::Bind(b) if b.read_only => Some(b.target.as_str()),
            _ => None,
        })
        .collect();
    assert!(read_only_targets.contains(&"/docker-entrypoint-initdb.d/seed.sql"));
    assert!(read_only_targets.contains(&"/etc/postgresql/postgresql.conf"));

    let pull = commands.iter().position(|c| c.ends_with("pull")).unwrap();
    assert!(pull < up);
}

/// Key-value store without a custom conf: startup command is the base
/// command with auth and durability flags only, no conf bind mount, no
/// file-copy side channel.
#[tokio::test]
async fn key_value_store_without_conf() {
    let config = base_config(
        "kv-scn-b",
        "redis:7",
        Engine::Redis {
            password: "hunter2".into(),
            conf: None,
        },
    );

    let executor = MockExecutor::new();
    let sink = RecordingSink::new();
    let locks = DeployLocks::new();

    start_database(&config, Path::new(BASE_DIR), "", &executor, &sink, &locks)
        .await
        .unwrap();

    assert!(executor.uploaded().await.is_empty(), "no side channel");

    let executed = executor.executed().await;
    let commands = executed[0].1.commands();
    let descriptor = decoded_write(commands, "docker-compose.yml");
    let compose: moorage_deploy::compose::ComposeFile =
        serde_yaml::from_str(&descriptor).unwrap();
    let service = compose.services.get("kv-scn-b").unwrap();

    assert_eq!(
        service.command,
        Some(ComposeCommand::Shell(
            "redis-server --requirepass hunter2 --appendonly yes".into()
        ))
    );
    let conf_bound = service.volumes.iter().any(|v| {
        matches!(v, ServiceVolume::Bind(b) if b.target == "/usr/local/etc/redis/redis.conf")
    });
    assert!(!conf_bound);
}

/// Document store: exactly one generated bootstrap script creating a
/// scoped readWrite user for the configured database, regardless of
/// caller init scripts.
#[tokio::test]
async fn document_store_generates_scoped_bootstrap() {
    let mut config = base_config(
        "mg-scn-c",
        "mongo:7",
        Engine::Mongodb {
            root_username: "root".into(),
            root_password: "pw".into(),
            initdb_database: "orders".into(),
            conf: None,
        },
    );
    config.persistent_storages = vec![PersistentStorage {
        name: "mongo-data".into(),
        host_path: None,
        mount_path: "/data/db".into(),
    }];
    config.runtime_environment_variables = vec![EnvVar {
        key: "TZ".into(),
        value: "UTC".into(),
    }];

    let executor = MockExecutor::new();
    let sink = RecordingSink::new();
    let locks = DeployLocks::new();

    start_database(&config, Path::new(BASE_DIR), "", &executor, &sink, &locks)
        .await
        .unwrap();

    let executed = executor.executed().await;
    let commands = executed[0].1.commands();

    let bootstrap_writes: Vec<&String> = commands
        .iter()
        .filter(|c| c.contains("docker-entrypoint-initdb.d/") && c.contains("base64 -d"))
        .collect();
    assert_eq!(bootstrap_writes.len(), 1);

    let script = decoded_write(commands, "01-default-database.js");
    assert!(script.contains("db.getSiblingDB(\"orders\")"));
    assert!(script.contains("role:\"readWrite\",db:\"orders\""));

    // Mandatory credentials are injected after the caller-supplied entry.
    let descriptor = decoded_write(commands, "docker-compose.yml");
    let compose: moorage_deploy::compose::ComposeFile =
        serde_yaml::from_str(&descriptor).unwrap();
    let service = compose.services.get("mg-scn-c").unwrap();
    assert_eq!(service.environment[0], "TZ=UTC");
    assert!(
        service
            .environment
            .contains(&"MONGO_INITDB_ROOT_USERNAME=root".to_string())
    );
    assert!(
        service
            .environment
            .contains(&"MONGO_INITDB_DATABASE=orders".to_string())
    );

    // Named volume registered as deployment-owned.
    let registry = compose.volumes.as_ref().unwrap();
    assert!(!registry.get("mongo-data").unwrap().external);
}

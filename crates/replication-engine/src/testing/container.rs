//! Docker-managed MySQL server for end-to-end replication tests

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mysql_async::prelude::*;
use mysql_async::{OptsBuilder, Pool};
use tracing::{debug, info};

use crate::connection::DatabaseConfig;

const ROOT_PASSWORD: &str = "testpass";

/// One `mysql:8.0` container holding every database a test needs
/// (master, slave and stats are separate schemas on the same server).
pub struct MySqlContainer {
    pub container_name: String,
    pub host_port: u16,
    pub image_name: String,
}

impl MySqlContainer {
    pub fn new(container_name: &str, host_port: u16) -> Self {
        Self {
            container_name: container_name.to_string(),
            host_port,
            image_name: "mysql:8.0".to_string(),
        }
    }

    /// Replace any container of the same name and start a fresh one.
    pub fn start(&self) -> Result<()> {
        info!("Starting MySQL container: {}", self.container_name);
        self.remove_quietly();

        let output = Command::new("docker")
            .args([
                "run",
                "--name",
                &self.container_name,
                "-e",
                &format!("MYSQL_ROOT_PASSWORD={ROOT_PASSWORD}"),
                "-p",
                &format!("{}:3306", self.host_port),
                "-d",
                &self.image_name,
            ])
            .output()
            .context("Failed to start Docker container")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to start container: {stderr}");
        }
        info!(
            "Started container: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    pub async fn wait_until_ready(&self, timeout_secs: u64) -> Result<()> {
        info!("Waiting for MySQL to be ready...");
        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_secs);

        while start.elapsed() < timeout {
            match self.query_count(None, "SELECT 1").await {
                Ok(_) => {
                    info!("MySQL is ready");
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connection attempt failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        anyhow::bail!("MySQL did not become ready within {timeout_secs} seconds")
    }

    /// Connection settings for `database` as the root user.
    pub fn database_config(&self, database: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: self.host_port,
            user: "root".to_string(),
            password: ROOT_PASSWORD.to_string(),
            database: database.to_string(),
        }
    }

    fn pool(&self, database: Option<&str>) -> Pool {
        let opts = OptsBuilder::default()
            .ip_or_hostname("127.0.0.1")
            .tcp_port(self.host_port)
            .user(Some("root"))
            .pass(Some(ROOT_PASSWORD))
            .db_name(database);
        Pool::new(opts)
    }

    /// Drop and recreate `database`.
    pub async fn recreate_database(&self, database: &str) -> Result<()> {
        self.execute(None, &format!("DROP DATABASE IF EXISTS `{database}`"))
            .await?;
        self.execute(None, &format!("CREATE DATABASE `{database}`"))
            .await
    }

    /// Run `sql` over the text protocol, in `database` when given.
    pub async fn execute(&self, database: Option<&str>, sql: &str) -> Result<()> {
        let pool = self.pool(database);
        let mut conn = pool.get_conn().await.context("Failed to get connection")?;
        conn.query_drop(sql)
            .await
            .with_context(|| format!("Failed to execute: {sql}"))?;
        drop(conn);
        pool.disconnect().await.context("Failed to disconnect pool")?;
        Ok(())
    }

    /// Number of rows `sql` returns.
    pub async fn query_count(&self, database: Option<&str>, sql: &str) -> Result<usize> {
        let pool = self.pool(database);
        let mut conn = pool.get_conn().await.context("Failed to get connection")?;
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .with_context(|| format!("Failed to query: {sql}"))?;
        drop(conn);
        pool.disconnect().await.context("Failed to disconnect pool")?;
        Ok(rows.len())
    }

    /// First column of the first row of `sql`, as text.
    pub async fn query_text(&self, database: &str, sql: &str) -> Result<Option<String>> {
        let pool = self.pool(Some(database));
        let mut conn = pool.get_conn().await.context("Failed to get connection")?;
        let value: Option<String> = conn
            .query_first(sql)
            .await
            .with_context(|| format!("Failed to query: {sql}"))?;
        drop(conn);
        pool.disconnect().await.context("Failed to disconnect pool")?;
        Ok(value)
    }

    fn remove_quietly(&self) {
        for action in ["stop", "rm"] {
            let _ = Command::new("docker")
                .args([action, &self.container_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }

    pub fn stop(&self) {
        info!("Stopping container: {}", self.container_name);
        self.remove_quietly();
    }
}

impl Drop for MySqlContainer {
    fn drop(&mut self) {
        self.stop();
    }
}

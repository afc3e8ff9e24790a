//! Remote node addressing and command execution.
use std::cmp::Ordering;

use anyhow::Context;
use tracing::{debug, warn};

use crate::{
    command::{CommandBuilder, Target},
    error::Error,
    outcome::Outcome,
    platform::{EnvInfo, FileBody, NodeInfo, PlatformApi, ScriptInfo},
};

pub const LOG_PATH: &str = "var/log/letsencrypt.log";
pub const BACKUP_PATH: &str = "var/lib/jelastic/keys/letsencrypt";

/// Platforms from this version on take named `AttachExtIp` parameters.
const NAMED_ATTACH_VERSION: &str = "4.9.5";

const BALANCER_GROUPS: [&str; 2] = ["bl", "lb"];
const COMPUTE_GROUP: &str = "cp";

/// Compare dotted version strings numerically. Missing or non-numeric
/// components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| part.trim().parse().unwrap_or(0))
            .collect()
    };
    let (a, b) = (parse(a), parse(b));
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Groups other than the balancer and compute layers.
pub fn is_extra_layer(group: &str) -> bool {
    !(BALANCER_GROUPS.contains(&group) || group == COMPUTE_GROUP)
}

/// Resolves paths and nodes of one environment and runs commands on them.
pub struct NodeManager<P> {
    platform: P,
    env_name: String,
    base_dir: String,
    node_id: Option<u64>,
    env_info: Option<EnvInfo>,
    platform_version: Option<String>,
    custom_ssl: Option<bool>,
    script_backup: Option<ScriptInfo>,
}

impl<P: PlatformApi> NodeManager<P> {
    pub fn new(platform: P, env_name: impl Into<String>, base_dir: impl Into<String>) -> Self {
        let base_dir = base_dir.into();
        Self {
            platform,
            env_name: env_name.into(),
            base_dir: if base_dir.is_empty() { "/".into() } else { base_dir },
            node_id: None,
            env_info: None,
            platform_version: None,
            custom_ssl: None,
            script_backup: None,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    pub fn path(&self, path: &str) -> String {
        format!("{}{path}", self.base_dir)
    }

    pub fn script_path(&self, name: &str) -> String {
        self.path(&format!("root/{name}"))
    }

    pub fn log_path(&self) -> String {
        self.path(LOG_PATH)
    }

    pub fn backup_path(&self) -> String {
        self.path(BACKUP_PATH)
    }

    pub fn set_node_id(&mut self, node_id: u64) {
        if self.node_id != Some(node_id) {
            self.custom_ssl = None;
        }
        self.node_id = Some(node_id);
    }

    /// Environment description, fetched once per workflow.
    pub async fn env_info(&mut self) -> Result<&EnvInfo, Error> {
        let info = match self.env_info.take() {
            Some(info) => info,
            None => {
                let info = self
                    .platform
                    .get_env_info(&self.env_name)
                    .await
                    .context("failed to get environment info")?;
                if !info.status.is_ok() {
                    return Err(Error::Platform(info.status));
                }
                info
            }
        };
        Ok(self.env_info.insert(info))
    }

    /// The current node's metadata, if a node is selected and present.
    pub async fn node(&mut self) -> Result<Option<NodeInfo>, Error> {
        let Some(node_id) = self.node_id else {
            return Ok(None);
        };
        let info = self.env_info().await?;
        Ok(info.nodes.iter().find(|node| node.id == node_id).cloned())
    }

    /// First balancer group of the environment, otherwise the compute group.
    pub async fn entry_point_group(&mut self) -> Result<String, Error> {
        let info = self.env_info().await?;
        let group = info
            .nodes
            .iter()
            .map(|node| node.node_group.as_str())
            .find(|group| BALANCER_GROUPS.contains(group))
            .unwrap_or(COMPUTE_GROUP);
        Ok(group.to_string())
    }

    pub async fn platform_version(&mut self) -> Result<String, Error> {
        if let Some(version) = &self.platform_version {
            return Ok(version.clone());
        }
        let version = self
            .platform
            .version()
            .await
            .context("failed to get platform version")?;
        self.platform_version = Some(version.clone());
        Ok(version)
    }

    pub async fn attach_ext_ip(&mut self, node_id: u64) -> Result<Outcome, Error> {
        let version = self.platform_version().await?;
        let legacy = compare_versions(&version, NAMED_ATTACH_VERSION) == Ordering::Less
            && !version.contains("trunk");
        let outcome = self
            .platform
            .attach_ext_ip(&self.env_name, node_id, legacy)
            .await
            .context("failed to attach external ip")?;
        // Node addresses changed.
        self.env_info = None;
        Ok(outcome)
    }

    /// Run a command and return the platform's answer, failed or not.
    ///
    /// `%(log)` defaults to the log path. Output of the first node is lifted
    /// into the outcome's `out` and `err_out`.
    pub async fn cmd(&self, builder: CommandBuilder) -> Result<Outcome, Error> {
        let builder = builder.default_value("log", self.log_path());
        let command = builder.build()?;
        let target = match builder.group() {
            Some(group) => Target::Group(group.to_string()),
            None => Target::Node(
                self.node_id
                    .context("no target node selected for the command")?,
            ),
        };
        debug!(%target, "cmd: {command}");
        let mut outcome = self
            .platform
            .exec_cmd(&self.env_name, &target, &command)
            .await
            .with_context(|| format!("failed to run command on {target}"))?;
        if let Some(first) = outcome.responses.first() {
            if outcome.out.is_none() {
                outcome.out = first.out.clone();
            }
            if outcome.err_out.is_none() {
                outcome.err_out = first.err_out.clone();
            }
            if outcome.exit_status.is_none() {
                outcome.exit_status = first.exit_status;
            }
        }
        Ok(outcome)
    }

    /// Like [`NodeManager::cmd`], but a failed command is an error.
    pub async fn cmd_checked(&self, builder: CommandBuilder) -> Result<Outcome, Error> {
        let outcome = self.cmd(builder).await?;
        if outcome.is_ok() {
            return Ok(outcome);
        }
        Err(Error::CommandFailed {
            code: outcome.result,
            exit_status: outcome.exit_status,
            out: outcome.out,
            err_out: outcome.err_out.or(outcome.error),
        })
    }

    pub async fn read_file(&self, path: &str) -> Result<FileBody, Error> {
        Ok(self
            .platform
            .read_file(&self.env_name, path, self.node_id)
            .await
            .with_context(|| format!("failed to read {path}"))?)
    }

    /// Whether the current node can take a custom certificate. Node
    /// metadata is trusted for docker nodes; other nodes are checked with
    /// `validation.sh`. Cached until the node changes.
    pub async fn check_custom_ssl(&mut self) -> bool {
        if let Some(supported) = self.custom_ssl {
            return supported;
        }
        let node = match self.node().await {
            Ok(node) => node,
            Err(err) => {
                warn!("failed to get node info: {err}");
                None
            }
        };
        let mut supported = false;
        if let Some(node) = node {
            supported = node.is_custom_ssl_support.unwrap_or(false);
            let is_docker = node.nodemission.as_deref() == Some("docker");
            let trusted = node.is_custom_ssl_support.is_some()
                && node.node_type.as_deref() == Some("DOCKERIZED");
            if !trusted && !is_docker {
                let check = CommandBuilder::lines(["source %(path)", "validateCustomSSL"])
                    .value("path", self.script_path("validation.sh"));
                supported = match self.cmd(check).await {
                    Ok(outcome) => outcome.is_ok(),
                    Err(err) => {
                        warn!("custom ssl check failed: {err}");
                        false
                    }
                };
            }
        }
        self.custom_ssl = Some(supported);
        supported
    }

    /// Snapshot the platform script so it can be recreated later.
    pub async fn backup_script(&mut self, name: &str) {
        match self.platform.get_script(name).await {
            Ok(script) => self.script_backup = Some(script),
            Err(err) => {
                warn!("failed to back up script {name}: {err:#}");
                self.script_backup = None;
            }
        }
    }

    /// Source of the snapshot taken by [`NodeManager::backup_script`].
    pub fn backup_script_code(&self) -> Option<&str> {
        self.script_backup
            .as_ref()
            .and_then(|info| info.script.as_ref())
            .map(|script| script.code.as_str())
            .filter(|code| !code.is_empty())
    }
}

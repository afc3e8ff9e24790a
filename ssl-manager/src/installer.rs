//! Certificate workflows.
//!
//! An [`Installer`] composes [`Step`]s into the install, update, uninstall
//! and auto-update workflows and runs them through the [`StepRunner`]
//! sequencer. All per-run state lives in a [`WorkflowContext`].
use std::{cmp::Ordering, future::Future, pin::Pin};

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    action::Action,
    command::CommandBuilder,
    config::InstallerConfig,
    error::Error,
    node_manager::{compare_versions, NodeManager},
    notification::{self, Notice, Notifier},
    outcome::{Outcome, WorkflowResult},
    platform::{JpsInstall, PlatformApi, PlatformClient},
    sequencer::{DebugTrace, ExecMode, StepRunner},
};

pub use steps::{DnatAction, Step};

mod steps;

/// Protocol version of the platform script this build creates. A different
/// installed version makes auto-update reinstall the add-on.
pub const PATCH_BUILD: u32 = 1;

const INSTALL_SCRIPT: &str = "install-le.sh";
const VALIDATION_SCRIPT: &str = "validation.sh";
const GENERATE_SCRIPT: &str = "generate-ssl-cert.sh";
const AUTO_UPDATE_SCRIPT: &str = "auto-update-ssl-cert.sh";
const PLATFORM_SCRIPT: &str = "install-ssl.js";
const MANIFEST: &str = "manifest.jps";
const LETSENCRYPT_DIR: &str = "opt/letsencrypt";
const SETTINGS_PATH: &str = "opt/letsencrypt/settings";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CertState {
    #[default]
    Uninstalled,
    Installing,
    Installed,
    Updating,
    Error,
}

/// Mutable state of one installer run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    pub node_id: Option<u64>,
    pub node_ip: String,
    pub node_group: Option<String>,
    pub env_domain: String,
    /// Space separated custom domains.
    pub custom_domains: Option<String>,
    /// Domains the certificate authority refused, in argument form.
    pub skipped_domains: String,
    pub token: String,
    pub patch_version: u32,
    pub session: String,
    pub token_valid: bool,
    pub state: CertState,
    pub trace: DebugTrace,
}

impl WorkflowContext {
    fn new(config: &InstallerConfig) -> Self {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.trim().is_empty());
        Self {
            node_id: config.node_id,
            node_ip: config.node_ip.clone().unwrap_or_default(),
            node_group: non_empty(&config.node_group),
            env_domain: config.env_domain.clone(),
            custom_domains: non_empty(&config.custom_domains),
            skipped_domains: String::new(),
            token: config.token.clone(),
            patch_version: config.patch_version,
            session: config.session.clone().unwrap_or_default(),
            token_valid: false,
            state: CertState::default(),
            trace: DebugTrace::default(),
        }
    }
}

/// Manages the Let's Encrypt certificate of one environment.
pub struct Installer<P = PlatformClient> {
    config: InstallerConfig,
    ctx: WorkflowContext,
    nodes: NodeManager<P>,
}

impl<P: PlatformApi> Installer<P> {
    pub fn new(config: InstallerConfig, platform: P) -> Self {
        let mut nodes = NodeManager::new(platform, &config.env_name, &config.base_dir);
        if let Some(node_id) = config.node_id {
            nodes.set_node_id(node_id);
        }
        Self {
            ctx: WorkflowContext::new(&config),
            config,
            nodes,
        }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    pub fn platform(&self) -> &P {
        self.nodes.platform()
    }

    /// Accept the caller if a session is present or `token` matches the
    /// configured one, ignoring whitespace. Without a configured token only
    /// a session is accepted.
    pub fn auth(&mut self, token: &str) -> Outcome {
        let normalized: String = token.chars().filter(|c| !c.is_whitespace()).collect();
        let expected = self.config.token.trim();
        if self.ctx.session.is_empty() && (expected.is_empty() || normalized != expected) {
            warn!("rejected invocation with a wrong token");
            return Error::PermissionDenied(token.to_string()).into();
        }
        self.ctx.token_valid = true;
        Outcome::ok()
    }

    /// Run the action named `action`. The `uninstall` flag of the config
    /// overrides the name.
    pub async fn invoke(&mut self, action: &str) -> WorkflowResult {
        let action = if self.config.uninstall {
            Ok(Action::Uninstall)
        } else {
            action.parse::<Action>()
        };
        match action {
            Ok(action) => self.run(action).await,
            Err(err) => {
                self.ctx.trace.reset();
                self.finish(err.into())
            }
        }
    }

    pub async fn run(&mut self, action: Action) -> WorkflowResult {
        self.ctx.trace.reset();
        info!(%action, env = %self.config.env_name, "running action");
        let outcome = match action {
            Action::Install => self.install(false).await,
            Action::Uninstall => self.uninstall().await,
            Action::AutoUpdate => self.auto_update().await,
            Action::BackupScripts => {
                let steps = self.backup_steps();
                self.exec(steps).await
            }
            Action::RestoreScripts => {
                let steps = self.restore_steps();
                self.exec_all(steps).await
            }
        };
        self.finish(outcome)
    }

    /// Validate the custom domains, pick the entry point, create the
    /// platform script and let it install the certificate.
    pub async fn create_script_and_install(&mut self) -> WorkflowResult {
        self.ctx.trace.reset();
        let domains = self.ctx.custom_domains.take();
        let outcome = self
            .exec(vec![
                Step::ApplyCustomDomains(domains),
                Step::InitEntryPoint,
                Step::ValidateEntryPoint,
                Step::CreateScript,
                Step::EvalScript(Some(Action::Install.to_string())),
            ])
            .await;
        self.finish(outcome)
    }

    async fn install(&mut self, is_update: bool) -> Outcome {
        self.ctx.state = if is_update {
            CertState::Updating
        } else {
            CertState::Installing
        };
        let mut outcome = self
            .exec(vec![
                Step::InstallLetsEncrypt,
                Step::GenerateSslConfig,
                Step::GenerateSslCerts,
                Step::UpdateGeneratedCustomDomains,
            ])
            .await;
        if outcome.is_ok() {
            outcome = self
                .exec_all(vec![Step::ScheduleAutoUpdate, Step::Deploy])
                .await;
        }
        self.exec_one(Step::SendResp {
            outcome: outcome.clone(),
            is_update,
        })
        .await;
        self.ctx.state = if outcome.is_ok() {
            CertState::Installed
        } else {
            CertState::Error
        };
        outcome
    }

    async fn uninstall(&mut self) -> Outcome {
        let auto_update_script = self.nodes.script_path(AUTO_UPDATE_SCRIPT);
        let paths = [
            self.nodes.path(LETSENCRYPT_DIR),
            self.nodes.script_path(GENERATE_SCRIPT),
            self.nodes.script_path("letsencrypt_settings"),
            self.nodes.script_path(INSTALL_SCRIPT),
            self.nodes.script_path(VALIDATION_SCRIPT),
            auto_update_script.clone(),
        ]
        .join(" ");
        let outcome = self
            .exec_all(vec![
                Step::Cmd(
                    CommandBuilder::new(
                        "crontab -l 2>/dev/null | grep -v '%(scriptPath)' | crontab -",
                    )
                    .value("scriptPath", auto_update_script),
                ),
                Step::Undeploy,
                Step::Cmd(CommandBuilder::new("rm -rf %(paths)").value("paths", paths)),
            ])
            .await;
        self.ctx.state = CertState::Uninstalled;
        outcome
    }

    async fn auto_update(&mut self) -> Outcome {
        let version = match self.nodes.platform_version().await {
            Ok(version) => version,
            Err(err) => return err.into(),
        };
        if compare_versions(&version, &self.config.min_platform_version) == Ordering::Less {
            info!(
                %version,
                min = %self.config.min_platform_version,
                "platform too old for auto-update"
            );
            return self.exec_one(Step::SendEmail(Notice::ActionRequired)).await;
        }

        if !self.config.is_task {
            self.log_action("StartUpdateLEFromContainer", None).await;
            let access = self.check_env_access().await;
            if !access.is_ok() {
                return self.check_env_access_and_update(access).await;
            }
        }

        let outcome = if self.ctx.patch_version == PATCH_BUILD {
            self.install(true).await
        } else {
            self.reinstall().await
        };
        self.log_action("EndUpdateLEFromContainer", Some(&outcome))
            .await;
        outcome
    }

    /// Reinstall the add-on from its manifest, restoring the scripts if the
    /// reinstall leaves the add-on removed.
    async fn reinstall(&mut self) -> Outcome {
        self.log_action("StartPatchLEAutoUpdate", None).await;
        let script_name = self.config.script_name.clone();
        self.nodes.backup_script(&script_name).await;

        let outcome = self.exec_one(Step::BackupScripts).await;
        if !outcome.is_ok() {
            self.log_action("ErrorPatchLEAutoUpdate", Some(&outcome))
                .await;
            return outcome;
        }

        let node_group = self.ctx.node_group.clone().unwrap_or_default();
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let request = JpsInstall::builder()
            .jps_url(self.file_url(MANIFEST))
            .env_name(self.config.env_name.clone())
            .node_group(node_group.clone())
            .settings(json!({
                "nodeId": self.ctx.node_id,
                "customDomains": text(&self.ctx.custom_domains),
                "nodeGroup": node_group,
                "deployHook": text(&self.config.deploy_hook),
                "deployHookType": text(&self.config.deploy_hook_type),
                "undeployHook": text(&self.config.undeploy_hook),
                "undeployHookType": text(&self.config.undeploy_hook_type),
            }))
            .build();
        let outcome = match self.nodes.platform().install_jps(&request).await {
            Ok(outcome) => outcome,
            Err(err) => Error::from(err.context("failed to install the manifest")).into(),
        };
        self.log_action("EndPatchLEAutoUpdate", Some(&outcome)).await;

        if !outcome.is_ok() {
            self.exec_one(Step::RestoreDataIfNeeded).await;
        }
        outcome
    }

    async fn check_env_access(&mut self) -> Outcome {
        if let Err(err) = self.nodes.env_info().await {
            return err.into();
        }
        match self.nodes.platform().write_log("checkPermissions").await {
            Ok(outcome) => outcome,
            Err(err) => Error::from(err).into(),
        }
    }

    /// A shared-session failure is retried from a scheduler task with a
    /// fresh session. Anything else is reported to the operator.
    async fn check_env_access_and_update(&mut self, failure: Outcome) -> Outcome {
        match Error::from_access_failure(&failure) {
            Error::SessionAccess(_) => self.exec_one(Step::AddAutoUpdateTask).await,
            _ => {
                self.exec_one(Step::SendErrResp(failure.clone())).await;
                failure
            }
        }
    }

    fn backup_steps(&self) -> Vec<Step> {
        let backup_path = self.nodes.backup_path();
        let scripts = [AUTO_UPDATE_SCRIPT, INSTALL_SCRIPT, VALIDATION_SCRIPT]
            .map(|name| self.nodes.script_path(name))
            .join(",");
        vec![
            Step::Cmd(CommandBuilder::new("mkdir -p %(backupPath)").value("backupPath", &backup_path)),
            Step::Cmd(
                CommandBuilder::new(
                    "cd %(letsencryptPath); hash tar 2>/dev/null && echo tar || yum install tar -y; \
                     tar -czvf backup.tar . >> %(logPath); mv backup.tar %(backupPath)",
                )
                .value("letsencryptPath", self.nodes.path(LETSENCRYPT_DIR))
                .value("logPath", self.nodes.log_path())
                .value("backupPath", &backup_path),
            ),
            Step::Cmd(
                CommandBuilder::new(
                    "cat /var/spool/cron/root | grep letsencrypt-ssl > %(backupPath)/letsencrypt-cron",
                )
                .value("backupPath", &backup_path),
            ),
            Step::Cmd(
                CommandBuilder::new(r"\cp -r {%(scriptToBackup)} %(backupPath)")
                    .value("scriptToBackup", scripts)
                    .value("backupPath", &backup_path),
            ),
        ]
    }

    fn restore_steps(&self) -> Vec<Step> {
        let backup_path = self.nodes.backup_path();
        vec![
            Step::Cmd(
                CommandBuilder::new("cat %(backupPath)/letsencrypt-cron >> /var/spool/cron/root")
                    .value("backupPath", &backup_path),
            ),
            Step::Cmd(
                CommandBuilder::new(
                    "hash tar 2>/dev/null && echo tar || yum install tar -y; \
                     mkdir -p %(settingsPath) && cd %(settingsPath) && \
                     tar -xzvf %(backupPath)/backup.tar > %(logPath)",
                )
                .value("settingsPath", self.nodes.path(LETSENCRYPT_DIR))
                .value("backupPath", &backup_path)
                .value("logPath", self.nodes.log_path()),
            ),
            Step::Cmd(
                CommandBuilder::new("cp -r %(backupPath)/{%(files)} %(rootPath)")
                    .value("backupPath", &backup_path)
                    .value(
                        "files",
                        [AUTO_UPDATE_SCRIPT, INSTALL_SCRIPT, VALIDATION_SCRIPT].join(","),
                    )
                    .value("rootPath", self.nodes.path("root")),
            ),
        ]
    }

    /// Record an action in the platform's add-on audit log. Failures are only
    /// logged locally.
    async fn log_action(&self, action_name: &str, outcome: Option<&Outcome>) {
        info!(action = action_name, "audit");
        let platform = self.nodes.platform();
        let uid = match platform.user_uid().await {
            Ok(uid) => uid,
            Err(err) => {
                warn!("failed to log action {action_name}: {err:#}");
                return;
            }
        };
        let mut data = json!({
            "appId": self.config.app_id,
            "email": self.config.email,
            "envAppid": self.config.env_appid,
            "envDomain": self.ctx.env_domain,
            "nodeGroup": self.ctx.node_group,
            "scriptName": self.config.script_name,
        });
        if outcome.is_some_and(Outcome::is_ok) {
            data["message"] = json!("LE add-on has been updated successfully");
        }
        let params = json!({
            "uid": uid,
            "actionName": action_name,
            "response": outcome,
            "data": data,
        });
        match platform.eval_appstore("LogAction", &params).await {
            Ok(response) if !response.status.is_ok() => {
                warn!("failed to log action {action_name}: {}", response.status);
            }
            Ok(_) => {}
            Err(err) => warn!("failed to log action {action_name}: {err:#}"),
        }
    }

    /// Run steps from inside another step.
    fn nested(
        &mut self,
        steps: Vec<Step>,
        mode: ExecMode,
    ) -> Pin<Box<dyn Future<Output = Outcome> + '_>> {
        Box::pin(self.exec_with(steps, mode, None))
    }

    fn finish(&self, outcome: Outcome) -> WorkflowResult {
        let mut result = WorkflowResult::new(outcome, self.ctx.trace.clone());
        result.skipped_domains = self.ctx.skipped_domains.clone();
        result.skipped_domains_note = notification::skipped_domains_note(&self.ctx.skipped_domains);
        result
    }

    fn notifier(&self) -> Notifier<'_, P> {
        Notifier {
            platform: self.nodes.platform(),
            base_url: &self.config.base_url,
            to: &self.config.email,
            env_domain: &self.ctx.env_domain,
        }
    }

    fn file_url(&self, path: &str) -> String {
        notification::file_url(&self.config.base_url, path)
    }

    fn script_url(&self, name: &str) -> String {
        self.file_url(&format!("scripts/{name}"))
    }
}

impl<P: PlatformApi> StepRunner for Installer<P> {
    type Step = Step;

    async fn run_step(&mut self, step: Step) -> Outcome {
        match self.dispatch(step).await {
            Ok(outcome) => outcome,
            Err(err) => err.into(),
        }
    }

    fn trace_mut(&mut self) -> &mut DebugTrace {
        &mut self.ctx.trace
    }

    async fn audit_failure(&mut self, method: &'static str, outcome: &Outcome) {
        self.log_action(&format!("InstallLE-{method}"), Some(outcome))
            .await;
    }
}

#[cfg(test)]
mod tests;

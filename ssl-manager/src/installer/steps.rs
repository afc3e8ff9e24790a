use std::collections::BTreeMap;

use anyhow::Context;
use once_cell::sync::Lazy;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{
    Installer, AUTO_UPDATE_SCRIPT, GENERATE_SCRIPT, INSTALL_SCRIPT, PATCH_BUILD, PLATFORM_SCRIPT,
    SETTINGS_PATH, VALIDATION_SCRIPT,
};
use crate::{
    command::CommandBuilder,
    domains::{from_domain_args, parse_domains, to_domain_args, validate_domains},
    error::Error,
    node_manager::is_extra_layer,
    notification::{self, Notice},
    outcome::{codes, Outcome},
    platform::{CertBundle, FileBody, PlatformApi, SchedulerTask},
    sequencer::{ExecMode, StepInfo},
    settings::{IssuedDomains, LeSettings},
    template::{self, DOCUMENT},
};

const TOKEN_LENGTH: usize = 64;
/// Keep this many trailing characters of the certificate tool's output.
const OUTPUT_TAIL: usize = 400;
const ADDON_APP_ID: &str = "letsencrypt-ssl-addon";

/// Start and optional end markers of errors reported by the certificate tool.
const SSL_ERROR_MARKERS: [(&str, Option<&str>); 3] = [
    ("An unexpected error", Some("Please see")),
    ("The following errors", Some("appid =")),
    ("Error: ", None),
];

static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z]+://").expect("url pattern is valid"));

const KEY_FILE: &str = "/tmp/privkey.url";
const CERT_FILE: &str = "/tmp/cert.url";
const CHAIN_FILE: &str = "/tmp/fullchain.url";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnatAction {
    Add,
    Remove,
}

impl DnatAction {
    fn flag(self) -> &'static str {
        match self {
            DnatAction::Add => "-I",
            DnatAction::Remove => "-D",
        }
    }
}

/// One unit of work of a workflow.
#[derive(Debug, Clone)]
pub enum Step {
    /// Validate and adopt a user supplied domain list.
    ApplyCustomDomains(Option<String>),
    InitEntryPoint,
    AttachExtIp(u64),
    ValidateEntryPoint,
    CreateScript,
    EvalScript(Option<String>),
    InstallLetsEncrypt,
    GenerateSslConfig,
    GenerateSslCerts,
    ManageDnat(DnatAction),
    UpdateGeneratedCustomDomains,
    ScheduleAutoUpdate,
    Deploy,
    Undeploy,
    EvalCode(String),
    BindSsl,
    RemoveSsl,
    Cmd(CommandBuilder),
    SendResp { outcome: Outcome, is_update: bool },
    SendErrResp(Outcome),
    SendEmail(Notice),
    AddAutoUpdateTask,
    BackupScripts,
    RestoreScripts,
    RestoreCsScript,
    RestoreDataIfNeeded,
}

impl StepInfo for Step {
    fn name(&self) -> &'static str {
        match self {
            Step::ApplyCustomDomains(_) => "applyCustomDomains",
            Step::InitEntryPoint => "initEntryPoint",
            Step::AttachExtIp(_) => "attachExtIp",
            Step::ValidateEntryPoint => "validateEntryPoint",
            Step::CreateScript => "createScript",
            Step::EvalScript(_) => "evalScript",
            Step::InstallLetsEncrypt => "installLetsEncrypt",
            Step::GenerateSslConfig => "generateSslConfig",
            Step::GenerateSslCerts => "generateSslCerts",
            Step::ManageDnat(_) => "manageDnat",
            Step::UpdateGeneratedCustomDomains => "updateGeneratedCustomDomains",
            Step::ScheduleAutoUpdate => "scheduleAutoUpdate",
            Step::Deploy => "deploy",
            Step::Undeploy => "undeploy",
            Step::EvalCode(_) => "evalCode",
            Step::BindSsl => "bindSSL",
            Step::RemoveSsl => "removeSSL",
            Step::Cmd(_) => "cmd",
            Step::SendResp { .. } => "sendResp",
            Step::SendErrResp(_) => "sendErrResp",
            Step::SendEmail(_) => "sendEmail",
            Step::AddAutoUpdateTask => "addAutoUpdateTask",
            Step::BackupScripts => "backupScripts",
            Step::RestoreScripts => "restoreScripts",
            Step::RestoreCsScript => "restoreCSScript",
            Step::RestoreDataIfNeeded => "restoreDataIfNeeded",
        }
    }

    fn args(&self) -> String {
        match self {
            Step::ApplyCustomDomains(domains) => domains.clone().unwrap_or_default(),
            Step::AttachExtIp(node_id) => node_id.to_string(),
            Step::EvalScript(action) => action.clone().unwrap_or_default(),
            Step::ManageDnat(DnatAction::Add) => "add".into(),
            Step::ManageDnat(DnatAction::Remove) => "remove".into(),
            Step::Cmd(command) => command.to_string(),
            Step::SendResp { outcome, is_update } => format!("{outcome}, {is_update}"),
            Step::SendErrResp(outcome) => outcome.to_string(),
            Step::SendEmail(notice) => notice.title().into(),
            _ => String::new(),
        }
    }
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn placeholder_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

fn file_body(file: &FileBody) -> Option<&str> {
    file.body.as_deref().filter(|body| !body.is_empty())
}

/// Turn the certificate tool's output into an error message if it reports
/// one. The first node's response is kept with its output cut to the tail.
pub(crate) fn analyze_ssl_response(outcome: Outcome) -> Outcome {
    let Some(mut response) = outcome.responses.first().cloned() else {
        return outcome;
    };
    let output = [&response.error, &response.err_out, &response.out]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect::<String>();

    let tail_start = output
        .char_indices()
        .rev()
        .nth(OUTPUT_TAIL - 1)
        .map_or(0, |(i, _)| i);
    response.out = Some(output[tail_start..].to_string());

    for (start, end) in SSL_ERROR_MARKERS {
        let Some(from) = output.find(start) else {
            continue;
        };
        let rest = &output[from..];
        let message = match end.and_then(|end| rest.find(end)) {
            Some(to) => &rest[..to],
            None => &rest[start.len()..],
        };
        return Outcome::error(codes::ERROR_UNKNOWN, message);
    }
    response
}

impl<P: PlatformApi> Installer<P> {
    pub(super) async fn dispatch(&mut self, step: Step) -> Result<Outcome, Error> {
        match step {
            Step::ApplyCustomDomains(domains) => self.apply_custom_domains(domains),
            Step::InitEntryPoint => self.init_entry_point().await,
            Step::AttachExtIp(node_id) => self.nodes.attach_ext_ip(node_id).await,
            Step::ValidateEntryPoint => self.validate_entry_point().await,
            Step::CreateScript => self.create_script().await,
            Step::EvalScript(action) => self.eval_script(action).await,
            Step::InstallLetsEncrypt => self.install_lets_encrypt().await,
            Step::GenerateSslConfig => self.generate_ssl_config().await,
            Step::GenerateSslCerts => self.generate_ssl_certs().await,
            Step::ManageDnat(action) => self.manage_dnat(action).await,
            Step::UpdateGeneratedCustomDomains => self.update_generated_custom_domains().await,
            Step::ScheduleAutoUpdate => self.schedule_auto_update().await,
            Step::Deploy => self.deploy().await,
            Step::Undeploy => self.undeploy().await,
            Step::EvalCode(code) => self.eval_code(&code).await,
            Step::BindSsl => self.bind_ssl().await,
            Step::RemoveSsl => Ok(self
                .nodes
                .platform()
                .remove_ssl(self.nodes.env_name())
                .await
                .context("failed to remove the certificate")?),
            Step::Cmd(command) => self.nodes.cmd(command).await,
            Step::SendResp { outcome, is_update } => self.send_resp(outcome, is_update).await,
            Step::SendErrResp(outcome) => self.send_err_resp(outcome).await,
            Step::SendEmail(notice) => Ok(self.notifier().send(notice, &BTreeMap::new()).await?),
            Step::AddAutoUpdateTask => self.add_auto_update_task().await,
            Step::BackupScripts => {
                let steps = self.backup_steps();
                Ok(self.nested(steps, ExecMode::BreakOnError).await)
            }
            Step::RestoreScripts => {
                let steps = self.restore_steps();
                Ok(self.nested(steps, ExecMode::ContinueOnError).await)
            }
            Step::RestoreCsScript => self.restore_cs_script().await,
            Step::RestoreDataIfNeeded => self.restore_data_if_needed().await,
        }
    }

    fn apply_custom_domains(&mut self, domains: Option<String>) -> Result<Outcome, Error> {
        if let Some(domains) = non_empty(&domains) {
            let domains = validate_domains(&domains)?;
            if !domains.is_empty() {
                self.ctx.custom_domains = Some(domains.join(" "));
            }
        }
        Ok(Outcome::ok())
    }

    /// Select the node that answers challenges, attaching external IPs to
    /// the candidates that lack one.
    async fn init_entry_point(&mut self) -> Result<Outcome, Error> {
        let node_id = self.ctx.node_id;
        let mut group = self.ctx.node_group.clone();
        if node_id.is_none() && group.is_none() {
            let entry_point = self.nodes.entry_point_group().await?;
            info!(group = %entry_point, "selected entry point group");
            self.ctx.node_group = Some(entry_point.clone());
            group = Some(entry_point);
        }

        let nodes = self.nodes.env_info().await?.nodes.clone();
        for node in nodes {
            let selected = match node_id {
                Some(id) => node.id == id,
                None => group.as_deref() == Some(node.node_group.as_str()),
            };
            if !selected {
                continue;
            }
            if node.ext_ips.is_empty() {
                let outcome = self
                    .nested(vec![Step::AttachExtIp(node.id)], ExecMode::BreakOnError)
                    .await;
                if !outcome.is_ok() {
                    return Ok(outcome);
                }
            }
            if node_id.is_some() || node.ismaster {
                self.ctx.node_id = Some(node.id);
                self.ctx.node_ip = node.address.clone();
                self.nodes.set_node_id(node.id);
                if is_extra_layer(&node.node_group) {
                    if let Some(url) = &node.url {
                        self.ctx.env_domain = url.trim_start_matches("http://").to_string();
                    }
                }
            }
            if node_id.is_some() {
                break;
            }
        }
        Ok(Outcome::ok())
    }

    async fn validate_entry_point(&mut self) -> Result<Outcome, Error> {
        let domain =
            non_empty(&self.ctx.custom_domains).unwrap_or_else(|| self.ctx.env_domain.clone());
        let command = CommandBuilder::lines([
            "mkdir -p $(dirname %(path))",
            "mkdir -p $(dirname %(logPath))",
            "wget --no-check-certificate '%(url)' -O '%(path)'",
            "chmod +x %(path) >> %(log)",
            "source %(path)",
            "validateExtIP",
            "validateDNSSettings '%(domain)'",
        ])
        .value("url", self.script_url(VALIDATION_SCRIPT))
        .value("logPath", self.nodes.log_path())
        .value("path", self.nodes.script_path(VALIDATION_SCRIPT))
        .value("domain", domain);

        let outcome = self.nodes.cmd(command).await?;
        if outcome.result == codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED {
            let response = outcome.responses.first().unwrap_or(&outcome);
            let details = response
                .err_out
                .as_deref()
                .filter(|text| !text.is_empty())
                .or(response.error.as_deref())
                .unwrap_or_default();
            let text = format!("{}\n{details}", response.out.as_deref().unwrap_or_default());
            return Ok(Outcome::error(codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED, text));
        }
        Ok(outcome)
    }

    /// Values of the `${name}` placeholders in the platform script.
    fn script_values(&self) -> Result<Map<String, Value>, Error> {
        let mut values = match serde_json::to_value(&self.config)
            .context("failed to serialize installer config")?
        {
            Value::Object(values) => values,
            _ => Map::new(),
        };
        let ctx = &self.ctx;
        for (key, value) in [
            ("token", json!(ctx.token)),
            ("patchVersion", json!(ctx.patch_version)),
            ("customDomains", json!(ctx.custom_domains.clone().unwrap_or_default())),
            ("nodeId", json!(ctx.node_id)),
            ("nodeIp", json!(ctx.node_ip)),
            ("nodeGroup", json!(ctx.node_group)),
            ("envDomain", json!(ctx.env_domain)),
        ] {
            values.insert(key.to_string(), value);
        }
        Ok(values)
    }

    async fn create_script(&mut self) -> Result<Outcome, Error> {
        let url = self.script_url(PLATFORM_SCRIPT);
        let body = self
            .nodes
            .platform()
            .fetch(&url)
            .await
            .context("failed to download the platform script")?;

        self.ctx.token = generate_token();
        self.ctx.patch_version = PATCH_BUILD;
        let values = self.script_values()?;
        let body = template::render(&body, DOCUMENT, |name| {
            values.get(name).and_then(placeholder_value)
        });

        let name = &self.config.script_name;
        let platform = self.nodes.platform();
        match platform.delete_script(name).await {
            Ok(outcome) => debug!("delete script {name}: {outcome}"),
            Err(err) => debug!("delete script {name}: {err:#}"),
        }
        let outcome = platform
            .create_script(name, &body)
            .await
            .context("failed to create the platform script")?;
        if !outcome.is_ok() {
            return Ok(outcome);
        }
        sleep(self.config.script_build_delay).await;
        platform
            .build_script(name)
            .await
            .context("failed to build the platform script")?
            .into_result()?;
        Ok(outcome)
    }

    async fn eval_script(&mut self, action: Option<String>) -> Result<Outcome, Error> {
        let mut params = json!({ "token": self.ctx.token });
        if let Some(action) = action {
            params["action"] = json!(action);
        }
        let response = self
            .nodes
            .platform()
            .eval_script(&self.config.script_name, &params)
            .await
            .context("failed to evaluate the platform script")?;
        Ok(response.into_outcome())
    }

    async fn install_lets_encrypt(&mut self) -> Result<Outcome, Error> {
        let command = CommandBuilder::lines([
            "wget --no-check-certificate '%(url)' -O '%(path)'",
            "chmod +x %(path)",
            "%(path) >> %(log)",
        ])
        .value("url", self.script_url(INSTALL_SCRIPT))
        .value("path", self.nodes.script_path(INSTALL_SCRIPT));
        self.nodes.cmd(command).await
    }

    async fn generate_ssl_config(&mut self) -> Result<Outcome, Error> {
        let custom_domains = self
            .ctx
            .custom_domains
            .as_deref()
            .map(parse_domains)
            .filter(|domains| !domains.is_empty());
        let settings = LeSettings {
            domain: custom_domains
                .as_deref()
                .map(to_domain_args)
                .unwrap_or_else(|| self.ctx.env_domain.clone()),
            email: self.config.email.clone(),
            appid: self.config.env_appid.clone(),
            appdomain: self.ctx.env_domain.clone(),
            base_dir: self.config.base_dir.clone(),
            test: self.config.test || custom_domains.is_none(),
            primary_domain: self.config.platform_host.clone(),
        };
        let command = CommandBuilder::new(r#"printf "%(params)" > %(path)"#)
            .value("params", settings.render_for_printf())
            .value("path", self.nodes.path(SETTINGS_PATH));
        self.nodes.cmd(command).await
    }

    /// Request the certificate with challenge traffic redirected to the
    /// selected node. The redirect is removed whatever the outcome.
    async fn generate_ssl_certs(&mut self) -> Result<Outcome, Error> {
        let script = self.nodes.script_path(GENERATE_SCRIPT);
        let download = CommandBuilder::lines([
            "wget --no-check-certificate '%(url)' -O %(path)",
            "chmod +x %(path)",
            "wget --no-check-certificate '%(validationUrl)' -O %(validationPath)",
            "chmod +x %(validationPath)",
        ])
        .value("url", self.script_url(GENERATE_SCRIPT))
        .value("path", &script)
        .value("validationUrl", self.script_url(VALIDATION_SCRIPT))
        .value("validationPath", self.nodes.script_path(VALIDATION_SCRIPT));
        self.nested(
            vec![Step::Cmd(download), Step::ManageDnat(DnatAction::Add)],
            ExecMode::ContinueOnError,
        )
        .await;

        let upload = self.nodes.check_custom_ssl().await;
        let generate = CommandBuilder::new(if upload {
            "%(path)"
        } else {
            "%(path) --no-upload-certs"
        })
        .value("path", &script);
        let outcome = self
            .nested(vec![Step::Cmd(generate)], ExecMode::BreakOnError)
            .await;
        let outcome = analyze_ssl_response(outcome);

        self.nested(
            vec![Step::ManageDnat(DnatAction::Remove)],
            ExecMode::BreakOnError,
        )
        .await;
        Ok(outcome)
    }

    /// Redirect inbound port 80 of the entry point group to the selected
    /// node. The node owning the address is left alone.
    async fn manage_dnat(&mut self, action: DnatAction) -> Result<Outcome, Error> {
        let mut command = CommandBuilder::new(
            "ip a | grep -q '%(nodeIp)' || { \
             iptables -t nat %(action) PREROUTING -p tcp --dport 80 -j DNAT --to-destination %(nodeIp):80; \
             iptables %(action) FORWARD -p tcp -j ACCEPT; \
             iptables -t nat %(action) POSTROUTING -d %(nodeIp) -j MASQUERADE; }",
        )
        .value("nodeIp", &self.ctx.node_ip)
        .value("action", action.flag());
        if let Some(group) = &self.ctx.node_group {
            command = command.on_group(group.clone());
        }
        self.nodes.cmd(command).await
    }

    async fn update_generated_custom_domains(&mut self) -> Result<Outcome, Error> {
        let command =
            CommandBuilder::new("cat %(setting)").value("setting", self.nodes.path(SETTINGS_PATH));
        let outcome = self.nodes.cmd_checked(command).await?;
        let issued = IssuedDomains::from_settings(outcome.out.as_deref().unwrap_or_default());
        let domains = from_domain_args(&issued.domains).join(" ");
        self.ctx.custom_domains = Some(domains).filter(|d| !d.is_empty());
        self.ctx.skipped_domains = issued.skipped;
        if !self.ctx.skipped_domains.is_empty() {
            info!(skipped = %self.ctx.skipped_domains, "certificate not issued for some domains");
        }
        Ok(Outcome::ok())
    }

    async fn schedule_auto_update(&mut self) -> Result<Outcome, Error> {
        let auto_update_url = format!(
            "https://{}/{}?appid={}&token={}&action=auto-update",
            self.config.platform_host, self.config.script_name, self.config.app_id, self.ctx.token
        );
        let command = CommandBuilder::lines([
            "wget --no-check-certificate '%(url)' -O %(scriptPath)",
            "chmod +x %(scriptPath)",
            "crontab -l 2>/dev/null | grep -v '%(scriptPath)' | crontab -",
            r#"echo "%(cronTime) su - root -c \"%(scriptPath) '%(autoUpdateUrl)' >> %(log)\"" >> /var/spool/cron/root"#,
        ])
        .value("url", self.script_url(AUTO_UPDATE_SCRIPT))
        .value("cronTime", &self.config.cron_time)
        .value("scriptPath", self.nodes.script_path(AUTO_UPDATE_SCRIPT))
        .value("autoUpdateUrl", auto_update_url);
        self.nodes.cmd(command).await
    }

    async fn deploy(&mut self) -> Result<Outcome, Error> {
        if let Some(hook) = non_empty(&self.config.deploy_hook) {
            let hook_type = self.config.deploy_hook_type.clone();
            return self.eval_hook(hook, hook_type).await;
        }
        if self.nodes.check_custom_ssl().await {
            return Ok(self.nested(vec![Step::BindSsl], ExecMode::BreakOnError).await);
        }
        Ok(Outcome::ok())
    }

    /// Skipped when a newer script owns the installation or another
    /// installation of the add-on in the environment still uses the
    /// certificate.
    async fn undeploy(&mut self) -> Result<Outcome, Error> {
        if self.ctx.patch_version != PATCH_BUILD || self.is_more_le_app_installed().await? {
            info!("leaving the certificate in place");
            return Ok(Outcome::ok());
        }
        if let Some(hook) = non_empty(&self.config.undeploy_hook) {
            let hook_type = self.config.undeploy_hook_type.clone();
            return self.eval_hook(hook, hook_type).await;
        }
        if self.nodes.check_custom_ssl().await {
            return Ok(self.nested(vec![Step::RemoveSsl], ExecMode::BreakOnError).await);
        }
        Ok(Outcome::ok())
    }

    /// Whether the add-on is installed on another node group of the
    /// environment.
    async fn is_more_le_app_installed(&self) -> Result<bool, Error> {
        let params = json!({
            "targetAppid": self.config.env_appid,
            "search": {
                "appstore": "1",
                "app_id": ADDON_APP_ID,
                "nodeGroup": { "!=": self.ctx.node_group.clone().unwrap_or_default() },
            },
        });
        let response = self
            .nodes
            .platform()
            .eval_appstore("GetApps", &params)
            .await
            .context("failed to list installed add-ons")?;
        if !response.status.is_ok() {
            return Err(Error::Platform(response.status));
        }
        Ok(response
            .response
            .as_ref()
            .and_then(|response| response.get("apps"))
            .and_then(Value::as_array)
            .is_some_and(|apps| !apps.is_empty()))
    }

    /// Run a deploy hook: inline code or a URL to fetch it from. `js` hooks
    /// are evaluated by the platform, anything else by bash on the node.
    async fn eval_hook(&mut self, hook: String, hook_type: Option<String>) -> Result<Outcome, Error> {
        let body = if URL_SCHEME.is_match(&hook) {
            self.nodes
                .platform()
                .fetch(&hook)
                .await
                .context("failed to download the hook")?
        } else {
            hook
        };
        let step = if hook_type.as_deref() == Some("js") {
            Step::EvalCode(body)
        } else {
            Step::Cmd(CommandBuilder::new("/bin/bash %(hook) >> %(log)").value("hook", body))
        };
        Ok(self.nested(vec![step], ExecMode::BreakOnError).await)
    }

    async fn eval_code(&mut self, code: &str) -> Result<Outcome, Error> {
        let params = Value::Object(self.script_values()?);
        let response = self
            .nodes
            .platform()
            .eval_code(code, &params)
            .await
            .context("failed to evaluate the hook")?;
        Ok(response.into_outcome())
    }

    async fn bind_ssl(&mut self) -> Result<Outcome, Error> {
        let key = self.nodes.read_file(KEY_FILE).await?;
        let cert = self.nodes.read_file(CERT_FILE).await?;
        let chain = self.nodes.read_file(CHAIN_FILE).await?;
        if let (Some(key), Some(cert), Some(chain)) =
            (file_body(&key), file_body(&cert), file_body(&chain))
        {
            let bundle = CertBundle {
                key: key.to_string(),
                cert: cert.to_string(),
                chain: chain.to_string(),
            };
            return Ok(self
                .nodes
                .platform()
                .bind_ssl(self.nodes.env_name(), &bundle)
                .await
                .context("failed to bind the certificate")?);
        }
        Ok(Outcome::error(
            codes::ERROR_UNKNOWN,
            format!(
                "Can't read SSL certificate: key={} cert={} chain={}",
                key.status, cert.status, chain.status
            ),
        ))
    }

    async fn send_resp(&mut self, outcome: Outcome, is_update: bool) -> Result<Outcome, Error> {
        if !outcome.is_ok() {
            return self.send_err_resp(outcome).await;
        }
        let values = notification::success_values(
            &self.ctx.env_domain,
            is_update,
            self.ctx.custom_domains.as_deref().unwrap_or_default(),
            &self.ctx.skipped_domains,
        );
        let notice = if is_update {
            Notice::Updated
        } else {
            Notice::Installed
        };
        Ok(self.notifier().send(notice, &values).await?)
    }

    /// Mail a failure to the operator. When every custom domain was refused
    /// the DNS explanation replaces the raw failure and trace.
    async fn send_err_resp(&mut self, outcome: Outcome) -> Result<Outcome, Error> {
        let no_custom_domains = self
            .ctx
            .custom_domains
            .as_deref()
            .map_or(true, str::is_empty);
        let response = if no_custom_domains && !self.ctx.skipped_domains.is_empty() {
            notification::dns_failure_explanation(&self.ctx.env_domain)
        } else {
            let mut report = serde_json::to_value(&outcome).context("failed to serialize outcome")?;
            report["debug"] =
                serde_json::to_value(&self.ctx.trace).context("failed to serialize trace")?;
            report.to_string()
        };
        let values = notification::error_values(&self.config.support_email, response);
        Ok(self.notifier().send(Notice::Error, &values).await?)
    }

    async fn add_auto_update_task(&mut self) -> Result<Outcome, Error> {
        self.log_action("AddLEAutoUpdateTask", None).await;
        let task = SchedulerTask::builder()
            .script(self.config.script_name.clone())
            .trigger("once_delay:1000")
            .description("update LE certificate")
            .params(json!({
                "token": self.ctx.token,
                "task": 1,
                "action": "auto-update",
            }))
            .build();
        Ok(self
            .nodes
            .platform()
            .add_task(&task)
            .await
            .context("failed to schedule the auto-update task")?)
    }

    async fn restore_cs_script(&mut self) -> Result<Outcome, Error> {
        self.log_action("AutoPatchLEScriptRestore", None).await;
        let Some(code) = self.nodes.backup_script_code() else {
            return Ok(Outcome::error(
                codes::ERROR_UNKNOWN,
                "no snapshot of the platform script to restore",
            ));
        };
        Ok(self
            .nodes
            .platform()
            .create_script(&self.config.script_name, code)
            .await
            .context("failed to restore the platform script")?)
    }

    /// Bring back the platform script and node scripts when a failed
    /// reinstall removed the add-on.
    async fn restore_data_if_needed(&mut self) -> Result<Outcome, Error> {
        let script = self
            .nodes
            .platform()
            .get_script(&self.config.script_name)
            .await
            .context("failed to look up the platform script")?;
        if script.status.result == codes::SCRIPT_NOT_FOUND {
            self.log_action("AutoPatchLEAddOnRemoved", None).await;
            if self.nodes.backup_script_code().is_some() {
                self.nested(
                    vec![Step::RestoreCsScript, Step::RestoreScripts],
                    ExecMode::BreakOnError,
                )
                .await;
            }
        }
        Ok(Outcome::ok())
    }
}

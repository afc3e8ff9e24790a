use std::{
    cell::{Cell, RefCell},
    time::Duration,
};

use anyhow::Result;
use serde_json::{json, Value};

use super::*;
use crate::{
    command::Target,
    outcome::codes,
    platform::{
        CertBundle, Email, EnvInfo, EvalResponse, FileBody, NodeInfo, SchedulerTask, Script,
        ScriptInfo,
    },
};

const EMAIL_TEMPLATE: &str = "${ACTION}|${UPDATED_DOMAINS}|${SKIPPED_DOMAINS}|${RESP}";
const SCRIPT_TEMPLATE: &str =
    "token=${token};env=${envName};domains=${customDomains};patch=${patchVersion};keep=${unknown}";

#[derive(Default)]
struct FakePlatform {
    version: String,
    env: EnvInfo,
    env_failure: Option<Outcome>,
    /// Commands containing the pattern answer with the outcome.
    failures: Vec<(&'static str, Outcome)>,
    /// Commands containing the pattern print the text.
    outputs: Vec<(&'static str, String)>,
    jps_result: Outcome,
    jps_removes_script: bool,
    script_missing: Cell<bool>,
    calls: RefCell<Vec<String>>,
    commands: RefCell<Vec<(Target, String)>>,
    emails: RefCell<Vec<Email>>,
    created_scripts: RefCell<Vec<(String, String)>>,
    evals: RefCell<Vec<Value>>,
    appstore: RefCell<Vec<(String, Value)>>,
    tasks: RefCell<Vec<SchedulerTask>>,
}

impl FakePlatform {
    fn new() -> Self {
        Self {
            version: "5.9.7".into(),
            env: env(),
            ..Default::default()
        }
    }

    fn called(&self, name: &str) -> bool {
        self.calls.borrow().iter().any(|call| call == name)
    }

    fn command_index(&self, pattern: &str) -> Option<usize> {
        self.commands
            .borrow()
            .iter()
            .position(|(_, command)| command.contains(pattern))
    }

    fn audit_actions(&self) -> Vec<String> {
        self.appstore
            .borrow()
            .iter()
            .filter(|(method, _)| method == "LogAction")
            .map(|(_, params)| params["actionName"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

fn env() -> EnvInfo {
    EnvInfo {
        status: Outcome::ok(),
        nodes: vec![
            NodeInfo {
                id: 11,
                node_group: "bl".into(),
                address: "10.0.0.11".into(),
                ext_ips: vec!["1.2.3.4".into()],
                ismaster: true,
                url: Some("http://node11-env-1.jelastic.cloud".into()),
                is_custom_ssl_support: Some(true),
                node_type: Some("DOCKERIZED".into()),
                nodemission: None,
            },
            NodeInfo {
                id: 13,
                node_group: "bl".into(),
                address: "10.0.0.13".into(),
                ext_ips: vec![],
                ismaster: false,
                ..Default::default()
            },
            NodeInfo {
                id: 21,
                node_group: "cp".into(),
                address: "10.0.0.21".into(),
                ismaster: true,
                ..Default::default()
            },
        ],
    }
}

impl PlatformApi for FakePlatform {
    async fn get_env_info(&self, _env_name: &str) -> Result<EnvInfo> {
        self.calls.borrow_mut().push("get_env_info".into());
        Ok(match &self.env_failure {
            Some(failure) => EnvInfo {
                status: failure.clone(),
                nodes: vec![],
            },
            None => self.env.clone(),
        })
    }

    async fn exec_cmd(&self, _env_name: &str, target: &Target, command: &str) -> Result<Outcome> {
        self.commands
            .borrow_mut()
            .push((target.clone(), command.to_string()));
        if let Some((_, outcome)) = self.failures.iter().find(|(p, _)| command.contains(p)) {
            return Ok(outcome.clone());
        }
        if let Some((_, out)) = self.outputs.iter().find(|(p, _)| command.contains(p)) {
            return Ok(Outcome {
                responses: vec![Outcome {
                    out: Some(out.clone()),
                    exit_status: Some(0),
                    ..Default::default()
                }],
                ..Default::default()
            });
        }
        Ok(Outcome::ok())
    }

    async fn attach_ext_ip(&self, _env_name: &str, node_id: u64, legacy: bool) -> Result<Outcome> {
        self.calls
            .borrow_mut()
            .push(format!("attach_ext_ip:{node_id}:{legacy}"));
        Ok(Outcome::ok())
    }

    async fn read_file(
        &self,
        _env_name: &str,
        path: &str,
        _node_id: Option<u64>,
    ) -> Result<FileBody> {
        Ok(FileBody {
            status: Outcome::ok(),
            body: Some(format!("pem of {path}")),
        })
    }

    async fn bind_ssl(&self, _env_name: &str, bundle: &CertBundle) -> Result<Outcome> {
        self.calls
            .borrow_mut()
            .push(format!("bind_ssl:{}", bundle.chain));
        Ok(Outcome::ok())
    }

    async fn remove_ssl(&self, _env_name: &str) -> Result<Outcome> {
        self.calls.borrow_mut().push("remove_ssl".into());
        Ok(Outcome::ok())
    }

    async fn send_email(&self, email: &Email) -> Result<Outcome> {
        self.emails.borrow_mut().push(email.clone());
        Ok(Outcome::ok())
    }

    async fn add_task(&self, task: &SchedulerTask) -> Result<Outcome> {
        self.tasks.borrow_mut().push(task.clone());
        Ok(Outcome::ok())
    }

    async fn version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn get_script(&self, _name: &str) -> Result<ScriptInfo> {
        if self.script_missing.get() {
            return Ok(ScriptInfo {
                status: Outcome::error(codes::SCRIPT_NOT_FOUND, "script not found"),
                script: None,
            });
        }
        Ok(ScriptInfo {
            status: Outcome::ok(),
            script: Some(Script {
                code: "// installed script".into(),
            }),
        })
    }

    async fn create_script(&self, name: &str, code: &str) -> Result<Outcome> {
        self.calls.borrow_mut().push("create_script".into());
        self.created_scripts
            .borrow_mut()
            .push((name.to_string(), code.to_string()));
        Ok(Outcome::ok())
    }

    async fn delete_script(&self, _name: &str) -> Result<Outcome> {
        self.calls.borrow_mut().push("delete_script".into());
        Ok(Outcome::ok())
    }

    async fn build_script(&self, _name: &str) -> Result<Outcome> {
        self.calls.borrow_mut().push("build_script".into());
        Ok(Outcome::ok())
    }

    async fn eval_script(&self, _name: &str, params: &Value) -> Result<EvalResponse> {
        self.evals.borrow_mut().push(params.clone());
        Ok(EvalResponse {
            status: Outcome::ok(),
            response: Some(json!({ "result": 0 })),
        })
    }

    async fn eval_appstore(&self, method: &str, params: &Value) -> Result<EvalResponse> {
        self.appstore
            .borrow_mut()
            .push((method.to_string(), params.clone()));
        let response = match method {
            "GetApps" => json!({ "result": 0, "apps": [] }),
            _ => json!({ "result": 0 }),
        };
        Ok(EvalResponse {
            status: Outcome::ok(),
            response: Some(response),
        })
    }

    async fn eval_code(&self, _code: &str, _params: &Value) -> Result<EvalResponse> {
        self.calls.borrow_mut().push("eval_code".into());
        Ok(EvalResponse::default())
    }

    async fn install_jps(&self, _request: &JpsInstall) -> Result<Outcome> {
        self.calls.borrow_mut().push("install_jps".into());
        if self.jps_removes_script {
            self.script_missing.set(true);
        }
        Ok(self.jps_result.clone())
    }

    async fn user_uid(&self) -> Result<u64> {
        Ok(42)
    }

    async fn write_log(&self, message: &str) -> Result<Outcome> {
        self.calls.borrow_mut().push(format!("write_log:{message}"));
        Ok(Outcome::ok())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.borrow_mut().push(format!("fetch:{url}"));
        Ok(if url.contains("/html/") {
            EMAIL_TEMPLATE.into()
        } else if url.contains("install-ssl.js") {
            SCRIPT_TEMPLATE.into()
        } else {
            String::new()
        })
    }
}

fn config() -> InstallerConfig {
    InstallerConfig::builder()
        .app_id("app-1")
        .env_name("env-1")
        .env_domain("env-1.jelastic.cloud")
        .env_appid("env-appid")
        .base_url("https://cdn.example.com/addon")
        .script_name("letsencrypt-ssl-env-1")
        .email("ops@example.com")
        .platform_host("app.jelastic.cloud")
        .token("secret-token")
        .node_id(11)
        .node_ip("10.0.0.11".to_string())
        .node_group("bl".to_string())
        .patch_version(PATCH_BUILD)
        .script_build_delay(Duration::ZERO)
        .build()
}

fn installer(config: InstallerConfig, platform: FakePlatform) -> Installer<FakePlatform> {
    Installer::new(config, platform)
}

fn methods(result: &WorkflowResult) -> Vec<&'static str> {
    result.debug.methods().collect()
}

fn failed(code: i32, text: &str) -> Outcome {
    Outcome::error(code, text)
}

#[test]
fn auth_ignores_whitespace() {
    let mut installer = installer(config(), FakePlatform::new());
    assert!(installer.auth(" secret-\ttoken \n").is_ok());
    assert!(installer.context().token_valid);
}

#[test]
fn auth_rejects_wrong_token() {
    let mut installer = installer(config(), FakePlatform::new());
    let outcome = installer.auth("nope");
    assert_eq!(outcome.result, codes::PERMISSION_DENIED);
    assert_eq!(outcome.error.as_deref(), Some("wrong token"));
    assert_eq!(outcome.message.as_deref(), Some("Token [nope] does not match"));
    assert!(!installer.context().token_valid);
}

#[test]
fn auth_accepts_any_token_with_a_session() {
    let mut config = config();
    config.session = Some("session-1".into());
    let mut installer = installer(config, FakePlatform::new());
    assert!(installer.auth("whatever").is_ok());
}

#[test]
fn auth_rejects_everything_without_a_configured_token() {
    let mut config = config();
    config.token = String::new();
    let mut installer = installer(config, FakePlatform::new());
    for token in ["", "  ", "\t\n"] {
        assert_eq!(installer.auth(token).result, codes::PERMISSION_DENIED);
    }
    assert!(!installer.context().token_valid);
}

#[tokio::test]
async fn unknown_action_is_rejected() {
    let mut installer = installer(config(), FakePlatform::new());
    let result = installer.invoke("renew").await;
    assert_eq!(result.result, codes::ERROR_UNKNOWN);
    assert_eq!(result.error.as_deref(), Some("unknown action [renew]"));
    assert!(result.debug.is_empty());
    assert!(installer.platform().commands.borrow().is_empty());
}

#[tokio::test]
async fn uninstall_flag_overrides_the_action() {
    let mut config = config();
    config.uninstall = true;
    let mut installer = installer(config, FakePlatform::new());
    let result = installer.invoke("install").await;
    assert!(methods(&result).contains(&"undeploy"));
    assert!(!methods(&result).contains(&"installLetsEncrypt"));
}

#[tokio::test]
async fn install_reports_skipped_domains() {
    let mut config = config();
    config.custom_domains = Some("a.com b.com".into());
    let mut platform = FakePlatform::new();
    platform.outputs = vec![(
        "cat /opt/letsencrypt/settings",
        "domain='a.com'\nemail='ops@example.com'\nskipped_domains='-d b.com'\n".into(),
    )];
    let mut installer = installer(config, platform);

    let result = installer.run(Action::Install).await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.skipped_domains, "-d b.com");
    assert!(result
        .skipped_domains_note
        .as_deref()
        .is_some_and(|note| note.contains("b.com")));
    assert_eq!(installer.context().state, CertState::Installed);
    assert_eq!(installer.context().custom_domains.as_deref(), Some("a.com"));

    let platform = installer.platform();
    let settings = platform.command_index("printf").unwrap();
    assert!(platform.commands.borrow()[settings]
        .1
        .contains("domain='a.com -d b.com'"));
    assert!(platform.called("bind_ssl:pem of /tmp/fullchain.url"));

    let emails = platform.emails.borrow();
    assert_eq!(emails.len(), 1);
    assert_eq!(
        emails[0].subject,
        "Successful Installation: Let's Encrypt SSL at env-1.jelastic.cloud"
    );
    let parts: Vec<&str> = emails[0].html.split('|').collect();
    assert_eq!(parts.len(), 4, "unexpected email body: {}", emails[0].html);
    let (action, updated, skipped) = (parts[0], parts[1], parts[2]);
    assert_eq!(action, "installed");
    assert!(updated.contains("<a href=\"https://a.com/\">a.com</a>"));
    assert!(!skipped.is_empty());
    assert!(skipped.contains("<b>b.com</b>"));
}

#[tokio::test]
async fn install_schedules_auto_update() {
    let mut installer = installer(config(), FakePlatform::new());
    let result = installer.run(Action::Install).await;
    assert!(result.is_ok());

    let platform = installer.platform();
    let commands = platform.commands.borrow();
    let schedule = &commands[platform.command_index("/var/spool/cron/root").unwrap()].1;
    assert!(schedule.contains(
        "crontab -l 2>/dev/null | grep -v '/root/auto-update-ssl-cert.sh' | crontab -"
    ));
    assert!(schedule.contains(
        "'https://app.jelastic.cloud/letsencrypt-ssl-env-1?appid=app-1&token=secret-token&action=auto-update' >> /var/log/letsencrypt.log"
    ));
    assert!(schedule.starts_with("wget --no-check-certificate"));
}

#[tokio::test]
async fn install_stops_at_the_first_failure() {
    let mut platform = FakePlatform::new();
    platform.failures = vec![(
        "install-le.sh >>",
        failed(codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED, "install failed"),
    )];
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::Install).await;

    assert_eq!(result.result, codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED);
    assert_eq!(result.error.as_deref(), Some("install failed"));
    assert_eq!(methods(&result), ["installLetsEncrypt", "sendResp"]);
    assert_eq!(
        result.debug.entries()[0].outcome.method.as_deref(),
        Some("installLetsEncrypt")
    );
    assert_eq!(installer.context().state, CertState::Error);

    let platform = installer.platform();
    assert_eq!(platform.commands.borrow().len(), 1);
    assert_eq!(platform.audit_actions(), ["InstallLE-installLetsEncrypt"]);
    let emails = platform.emails.borrow();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.starts_with("Error: "));
    assert!(emails[0].html.contains("\"debug\""));
}

#[tokio::test]
async fn dnat_is_removed_when_generation_fails() {
    let mut platform = FakePlatform::new();
    platform.env.nodes[0].is_custom_ssl_support = Some(false);
    platform.failures = vec![(
        "generate-ssl-cert.sh --no-upload-certs",
        Outcome {
            result: codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED,
            responses: vec![Outcome {
                result: codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED,
                out: Some("Requesting certificate\nError: too many certificates already issued".into()),
                ..Default::default()
            }],
            ..Default::default()
        },
    )];
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::Install).await;

    assert_eq!(result.result, codes::ERROR_UNKNOWN);
    assert_eq!(
        result.error.as_deref(),
        Some("too many certificates already issued")
    );
    assert_eq!(result.debug.entries().last().map(|e| e.method), Some("sendResp"));
    assert!(!methods(&result).contains(&"updateGeneratedCustomDomains"));

    let platform = installer.platform();
    let generate = platform.command_index("--no-upload-certs").unwrap();
    let add = platform.command_index("-I PREROUTING").unwrap();
    let remove = platform.command_index("-D PREROUTING").unwrap();
    assert!(add < generate && generate < remove);
    let commands = platform.commands.borrow();
    assert_eq!(commands[remove].0, Target::Group("bl".into()));
    assert!(commands[remove].1.contains("--to-destination 10.0.0.11:80"));
}

#[test]
fn ssl_output_is_cut_to_its_tail() {
    let long = "x".repeat(1000);
    let outcome = Outcome {
        responses: vec![Outcome {
            out: Some(long),
            ..Default::default()
        }],
        ..Default::default()
    };
    let analyzed = steps::analyze_ssl_response(outcome);
    assert!(analyzed.is_ok());
    assert_eq!(analyzed.out.map(|out| out.len()), Some(400));
}

#[test]
fn ssl_errors_keep_their_marker_range() {
    let outcome = Outcome {
        responses: vec![Outcome {
            err_out: Some("An unexpected error occurred. Please see the logs".into()),
            ..Default::default()
        }],
        ..Default::default()
    };
    let analyzed = steps::analyze_ssl_response(outcome);
    assert_eq!(analyzed.error.as_deref(), Some("An unexpected error occurred. "));
}

#[tokio::test]
async fn auto_update_on_old_platform_only_asks_for_action() {
    let mut platform = FakePlatform::new();
    platform.version = "4.8.1".into();
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::AutoUpdate).await;

    assert!(result.is_ok());
    assert_eq!(methods(&result), ["sendEmail"]);
    let platform = installer.platform();
    assert!(platform.commands.borrow().is_empty());
    assert!(!platform.called("install_jps"));
    let emails = platform.emails.borrow();
    assert_eq!(emails.len(), 1);
    assert!(emails[0].subject.starts_with("Action Required: "));
}

#[tokio::test]
async fn auto_update_with_current_patch_updates() {
    let mut installer = installer(config(), FakePlatform::new());
    let result = installer.run(Action::AutoUpdate).await;

    assert!(result.is_ok());
    let platform = installer.platform();
    assert!(platform.called("write_log:checkPermissions"));
    assert!(!platform.called("install_jps"));
    assert_eq!(
        platform.audit_actions(),
        ["StartUpdateLEFromContainer", "EndUpdateLEFromContainer"]
    );
    assert!(platform.emails.borrow()[0]
        .subject
        .starts_with("Successful Update: "));
}

#[tokio::test]
async fn scheduled_auto_update_skips_access_checks() {
    let mut config = config();
    config.is_task = true;
    let mut installer = installer(config, FakePlatform::new());
    let result = installer.run(Action::AutoUpdate).await;

    assert!(result.is_ok());
    assert!(!installer.platform().called("write_log:checkPermissions"));
}

#[tokio::test]
async fn shared_session_failure_defers_to_the_scheduler() {
    let mut platform = FakePlatform::new();
    platform.env_failure = Some(failed(
        codes::USER_NOT_AUTHENTICATED,
        "session [xxx123] has no access to env-1",
    ));
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::AutoUpdate).await;

    assert!(result.is_ok());
    assert_eq!(methods(&result), ["addAutoUpdateTask"]);
    let platform = installer.platform();
    let tasks = platform.tasks.borrow();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].trigger, "once_delay:1000");
    assert_eq!(tasks[0].params["action"], "auto-update");
    assert_eq!(tasks[0].params["task"], 1);
    assert!(platform.commands.borrow().is_empty());
}

#[tokio::test]
async fn other_access_failures_are_mailed() {
    let mut platform = FakePlatform::new();
    platform.env_failure = Some(failed(codes::PERMISSION_DENIED, "denied"));
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::AutoUpdate).await;

    assert_eq!(result.result, codes::PERMISSION_DENIED);
    let platform = installer.platform();
    assert!(platform.tasks.borrow().is_empty());
    assert!(platform.emails.borrow()[0].subject.starts_with("Error: "));
}

#[tokio::test]
async fn failed_reinstall_restores_the_scripts() {
    let mut config = config();
    config.patch_version = 0;
    let mut platform = FakePlatform::new();
    platform.jps_result = failed(codes::ERROR_UNKNOWN, "manifest failed");
    platform.jps_removes_script = true;
    let mut installer = installer(config, platform);

    let result = installer.run(Action::AutoUpdate).await;

    assert_eq!(result.result, codes::ERROR_UNKNOWN);
    assert_eq!(result.error.as_deref(), Some("manifest failed"));
    let methods = methods(&result);
    assert!(methods.contains(&"backupScripts"));
    assert!(methods.contains(&"restoreCSScript"));
    assert!(methods.contains(&"restoreScripts"));

    let platform = installer.platform();
    assert_eq!(
        *platform.created_scripts.borrow(),
        [(
            "letsencrypt-ssl-env-1".to_string(),
            "// installed script".to_string()
        )]
    );
    let backup = platform.command_index("tar -czvf backup.tar").unwrap();
    let restore = platform.command_index("tar -xzvf").unwrap();
    assert!(backup < restore);
    assert!(platform
        .audit_actions()
        .contains(&"AutoPatchLEAddOnRemoved".to_string()));
}

#[tokio::test]
async fn uninstall_attempts_every_cleanup() {
    let mut platform = FakePlatform::new();
    platform.failures = vec![("crontab -l", failed(codes::ERROR_UNKNOWN, "no crontab"))];
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::Uninstall).await;

    assert!(result.is_ok());
    assert_eq!(methods(&result), ["cmd", "removeSSL", "undeploy", "cmd"]);
    assert_eq!(installer.context().state, CertState::Uninstalled);
    let platform = installer.platform();
    assert!(platform.called("remove_ssl"));
    let commands = platform.commands.borrow();
    let rm = &commands[platform.command_index("rm -rf").unwrap()].1;
    for path in [
        "/opt/letsencrypt",
        "/root/generate-ssl-cert.sh",
        "/root/letsencrypt_settings",
        "/root/install-le.sh",
        "/root/validation.sh",
        "/root/auto-update-ssl-cert.sh",
    ] {
        assert!(rm.contains(path), "{path} not removed");
    }
}

#[tokio::test]
async fn uninstall_removes_certificate_with_default_patch_version() {
    let config = InstallerConfig::builder()
        .app_id("app-1")
        .env_name("env-1")
        .base_url("https://cdn.example.com/addon")
        .script_name("letsencrypt-ssl-env-1")
        .token("secret-token")
        .node_id(11)
        .node_ip("10.0.0.11".to_string())
        .node_group("bl".to_string())
        .script_build_delay(Duration::ZERO)
        .build();
    let mut installer = installer(config, FakePlatform::new());

    let result = installer.run(Action::Uninstall).await;

    assert!(result.is_ok());
    assert!(methods(&result).contains(&"removeSSL"));
    assert!(installer.platform().called("remove_ssl"));
}

#[tokio::test]
async fn undeploy_hook_is_downloaded_only_when_given_as_url() {
    let mut from_url = config();
    from_url.undeploy_hook = Some("https://cdn.example.com/undeploy.js".into());
    from_url.undeploy_hook_type = Some("js".into());
    let mut installer = installer(from_url, FakePlatform::new());

    assert!(installer.run(Action::Uninstall).await.is_ok());
    let platform = installer.platform();
    assert!(platform.called("fetch:https://cdn.example.com/undeploy.js"));
    assert!(platform.called("eval_code"));
    assert!(!platform.called("remove_ssl"));

    let mut inline = config();
    inline.undeploy_hook = Some("jelastic.env.binder.RemoveSSL()".into());
    inline.undeploy_hook_type = Some("js".into());
    let mut installer = self::installer(inline, FakePlatform::new());

    assert!(installer.run(Action::Uninstall).await.is_ok());
    let platform = installer.platform();
    assert!(platform.called("eval_code"));
    assert!(!platform
        .calls
        .borrow()
        .iter()
        .any(|call| call.starts_with("fetch:")));
}

#[tokio::test]
async fn uninstall_keeps_certificate_of_a_newer_script() {
    let mut config = config();
    config.patch_version = PATCH_BUILD + 1;
    let mut installer = installer(config, FakePlatform::new());

    let result = installer.run(Action::Uninstall).await;

    assert!(result.is_ok());
    assert!(!installer.platform().called("remove_ssl"));
    assert_eq!(installer.platform().commands.borrow().len(), 2);
}

#[tokio::test]
async fn setup_rejects_invalid_domains() {
    let mut config = config();
    config.custom_domains = Some("example.com, bad_domain, foo.example.org".into());
    let mut installer = installer(config, FakePlatform::new());

    let result = installer.create_script_and_install().await;

    assert_eq!(result.result, codes::ERROR_UNKNOWN);
    assert!(result
        .message
        .as_deref()
        .is_some_and(|message| message.starts_with("Domain bad_domain is invalid.")));
    assert_eq!(methods(&result), ["applyCustomDomains"]);
    assert_eq!(installer.context().custom_domains, None);
    let platform = installer.platform();
    assert!(platform.commands.borrow().is_empty());
    assert!(platform.created_scripts.borrow().is_empty());
}

#[tokio::test]
async fn setup_creates_the_script_and_installs() {
    let mut config = config();
    config.node_id = None;
    config.node_group = None;
    config.custom_domains = Some("a.com, b.com".into());
    let mut installer = installer(config, FakePlatform::new());

    let result = installer.create_script_and_install().await;

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(
        methods(&result),
        [
            "applyCustomDomains",
            "attachExtIp",
            "initEntryPoint",
            "validateEntryPoint",
            "createScript",
            "evalScript"
        ]
    );
    let ctx = installer.context();
    assert_eq!(ctx.node_group.as_deref(), Some("bl"));
    assert_eq!(ctx.node_id, Some(11));
    assert_eq!(ctx.node_ip, "10.0.0.11");
    assert_eq!(ctx.custom_domains.as_deref(), Some("a.com b.com"));
    assert_eq!(ctx.token.len(), 64);
    assert_eq!(ctx.patch_version, PATCH_BUILD);

    let platform = installer.platform();
    assert!(platform.called("attach_ext_ip:13:false"));
    let commands = platform.commands.borrow();
    let (target, validate) = &commands[platform.command_index("validateExtIP").unwrap()];
    assert_eq!(*target, Target::Node(11));
    assert!(validate.contains("validateDNSSettings 'a.com b.com'"));

    let created = platform.created_scripts.borrow();
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].1,
        format!(
            "token={};env=env-1;domains=a.com b.com;patch=1;keep=${{unknown}}",
            ctx.token
        )
    );
    let delete = platform.calls.borrow().iter().position(|c| c == "delete_script");
    let create = platform.calls.borrow().iter().position(|c| c == "create_script");
    assert!(delete < create);
    assert!(platform.called("build_script"));

    let evals = platform.evals.borrow();
    assert_eq!(evals[0]["action"], "install");
    assert_eq!(evals[0]["token"], ctx.token.as_str());
}

#[tokio::test]
async fn extra_layer_entry_point_adopts_the_node_domain() {
    let mut config = config();
    config.node_id = None;
    config.node_group = Some("sqldb".into());
    let mut platform = FakePlatform::new();
    platform.env.nodes.push(NodeInfo {
        id: 31,
        node_group: "sqldb".into(),
        address: "10.0.0.31".into(),
        ext_ips: vec!["5.6.7.8".into()],
        ismaster: true,
        url: Some("http://node31-env-1.jelastic.cloud".into()),
        ..Default::default()
    });
    let mut installer = installer(config, platform);

    let result = installer.create_script_and_install().await;

    assert!(result.is_ok());
    assert_eq!(installer.context().node_id, Some(31));
    assert_eq!(installer.context().env_domain, "node31-env-1.jelastic.cloud");
}

#[tokio::test]
async fn validation_failure_carries_the_node_output() {
    let mut config = config();
    config.custom_domains = Some("a.com".into());
    let mut platform = FakePlatform::new();
    platform.failures = vec![(
        "validateDNSSettings",
        Outcome {
            result: codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED,
            error: Some("command failed".into()),
            responses: vec![Outcome {
                result: codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED,
                out: Some("checking DNS".into()),
                err_out: Some("a.com does not resolve to 1.2.3.4".into()),
                ..Default::default()
            }],
            ..Default::default()
        },
    )];
    let mut installer = installer(config, platform);

    let result = installer.create_script_and_install().await;

    assert_eq!(result.result, codes::JEM_OPERATION_COULD_NOT_BE_PERFORMED);
    assert_eq!(
        result.error.as_deref(),
        Some("checking DNS\na.com does not resolve to 1.2.3.4")
    );
    assert_eq!(
        result.debug.entries().last().map(|e| e.method),
        Some("validateEntryPoint")
    );
    assert!(installer.platform().created_scripts.borrow().is_empty());
}

#[tokio::test]
async fn backup_scripts_runs_in_order() {
    let mut installer = installer(config(), FakePlatform::new());
    let result = installer.run(Action::BackupScripts).await;

    assert!(result.is_ok());
    assert_eq!(methods(&result), ["cmd", "cmd", "cmd", "cmd"]);
    let commands = installer.platform().commands.borrow();
    assert_eq!(commands[0].1, "mkdir -p /var/lib/jelastic/keys/letsencrypt");
    assert_eq!(
        commands[3].1,
        r"\cp -r {/root/auto-update-ssl-cert.sh,/root/install-le.sh,/root/validation.sh} /var/lib/jelastic/keys/letsencrypt"
    );
}

#[tokio::test]
async fn restore_scripts_continues_after_failures() {
    let mut platform = FakePlatform::new();
    platform.failures = vec![("letsencrypt-cron", failed(codes::ERROR_UNKNOWN, "no cron"))];
    let mut installer = installer(config(), platform);

    let result = installer.run(Action::RestoreScripts).await;

    assert!(result.is_ok());
    assert_eq!(result.debug.len(), 3);
    assert!(!result.debug.entries()[0].outcome.is_ok());
    let commands = installer.platform().commands.borrow();
    assert_eq!(
        commands[2].1,
        "cp -r /var/lib/jelastic/keys/letsencrypt/{auto-update-ssl-cert.sh,install-le.sh,validation.sh} /root"
    );
}

#[tokio::test]
async fn trace_restarts_with_each_action() {
    let mut installer = installer(config(), FakePlatform::new());
    installer.run(Action::BackupScripts).await;
    let result = installer.run(Action::RestoreScripts).await;
    assert_eq!(result.debug.len(), 3);
}

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    CertBundle, Email, EnvInfo, EvalResponse, FileBody, JpsInstall, PlatformApi, SchedulerTask,
    ScriptInfo,
};
use crate::{command::Target, outcome::Outcome};

const API_VERSION: &str = "1.0";
const ROOT_USER: &str = "root";

/// REST client for a Jelastic/Virtuozzo style platform.
#[derive(Debug, Clone)]
pub struct JelasticClient {
    client: Client,
    api_url: String,
    app_id: String,
    session: String,
}

impl JelasticClient {
    pub fn new(api_url: String, app_id: String, session: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id,
            session,
        })
    }

    /// POST `params` to `<api_url>/1.0/<service>/rest/<method>`.
    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{API_VERSION}/{service}/rest/{method}", self.api_url);
        let mut form: Vec<(&str, String)> = vec![
            ("appid", self.app_id.clone()),
            ("session", self.session.clone()),
        ];
        form.extend(params.iter().cloned());
        debug!(%url, "calling platform");
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("failed to call {service}/{method}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{service}/{method} failed with {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to parse response of {service}/{method}"))
    }

    async fn eval(&self, script: &str, method: Option<&str>, params: &Value) -> Result<EvalResponse> {
        let mut form = vec![("script", script.to_string()), ("params", params.to_string())];
        if let Some(method) = method {
            form.push(("method", method.to_string()));
        }
        self.call("development/scripting", "eval", &form).await
    }
}

impl PlatformApi for JelasticClient {
    async fn get_env_info(&self, env_name: &str) -> Result<EnvInfo> {
        self.call(
            "environment/control",
            "getenvinfo",
            &[("envName", env_name.to_string())],
        )
        .await
    }

    async fn exec_cmd(&self, env_name: &str, target: &Target, command: &str) -> Result<Outcome> {
        let commands = json!([{ "command": command }]).to_string();
        match target {
            Target::Node(node_id) => {
                self.call(
                    "environment/control",
                    "execcmdbyid",
                    &[
                        ("envName", env_name.to_string()),
                        ("nodeId", node_id.to_string()),
                        ("commandList", commands),
                        ("sayYes", "true".into()),
                        ("userName", ROOT_USER.into()),
                    ],
                )
                .await
            }
            Target::Group(group) => {
                self.call(
                    "environment/control",
                    "execcmdbygroup",
                    &[
                        ("envName", env_name.to_string()),
                        ("nodeGroup", group.clone()),
                        ("commandList", commands),
                        ("sayYes", "true".into()),
                        ("async", "false".into()),
                        ("userName", ROOT_USER.into()),
                    ],
                )
                .await
            }
        }
    }

    async fn attach_ext_ip(&self, env_name: &str, node_id: u64, legacy: bool) -> Result<Outcome> {
        // Older platforms only know the positional `nodeId` parameter.
        let node_param = if legacy { "nodeId" } else { "nodeid" };
        self.call(
            "environment/control",
            "attachextip",
            &[
                ("envName", env_name.to_string()),
                (node_param, node_id.to_string()),
            ],
        )
        .await
    }

    async fn read_file(
        &self,
        env_name: &str,
        path: &str,
        node_id: Option<u64>,
    ) -> Result<FileBody> {
        let mut params = vec![("envName", env_name.to_string()), ("path", path.to_string())];
        if let Some(node_id) = node_id {
            params.push(("nodeid", node_id.to_string()));
        }
        self.call("environment/file", "read", &params).await
    }

    async fn bind_ssl(&self, env_name: &str, bundle: &CertBundle) -> Result<Outcome> {
        self.call(
            "environment/binder",
            "bindssl",
            &[
                ("envName", env_name.to_string()),
                ("cert_key", bundle.key.clone()),
                ("cert", bundle.cert.clone()),
                ("intermediate", bundle.chain.clone()),
            ],
        )
        .await
    }

    async fn remove_ssl(&self, env_name: &str) -> Result<Outcome> {
        self.call(
            "environment/binder",
            "removessl",
            &[("envName", env_name.to_string())],
        )
        .await
    }

    async fn send_email(&self, email: &Email) -> Result<Outcome> {
        self.call(
            "message/email",
            "send",
            &[
                ("to", email.to.clone()),
                ("toName", email.to.clone()),
                ("subject", email.subject.clone()),
                ("body", email.html.clone()),
            ],
        )
        .await
    }

    async fn add_task(&self, task: &SchedulerTask) -> Result<Outcome> {
        self.call(
            "utils/scheduler",
            "addtask",
            &[
                ("script", task.script.clone()),
                ("trigger", task.trigger.clone()),
                ("description", task.description.clone()),
                ("params", task.params.to_string()),
            ],
        )
        .await
    }

    async fn version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Version {
            #[serde(flatten)]
            status: Outcome,
            #[serde(default)]
            version: String,
        }

        let response: Version = self.call("system/service", "getversion", &[]).await?;
        if !response.status.is_ok() {
            anyhow::bail!("failed to get platform version: {}", response.status.describe());
        }
        Ok(response
            .version
            .split('-')
            .next()
            .unwrap_or_default()
            .to_string())
    }

    async fn get_script(&self, name: &str) -> Result<ScriptInfo> {
        self.call(
            "development/scripting",
            "getscript",
            &[("name", name.to_string())],
        )
        .await
    }

    async fn create_script(&self, name: &str, code: &str) -> Result<Outcome> {
        self.call(
            "development/scripting",
            "createscript",
            &[
                ("name", name.to_string()),
                ("type", "js".into()),
                ("code", code.to_string()),
            ],
        )
        .await
    }

    async fn delete_script(&self, name: &str) -> Result<Outcome> {
        self.call(
            "development/scripting",
            "deletescript",
            &[("name", name.to_string())],
        )
        .await
    }

    async fn build_script(&self, name: &str) -> Result<Outcome> {
        self.call(
            "development/scripting",
            "build",
            &[("name", name.to_string())],
        )
        .await
    }

    async fn eval_script(&self, name: &str, params: &Value) -> Result<EvalResponse> {
        self.eval(name, None, params).await
    }

    async fn eval_appstore(&self, method: &str, params: &Value) -> Result<EvalResponse> {
        self.eval("appstore", Some(method), params).await
    }

    async fn eval_code(&self, code: &str, params: &Value) -> Result<EvalResponse> {
        self.call(
            "development/scripting",
            "evalcode",
            &[
                ("code", code.to_string()),
                ("type", "js".into()),
                ("params", params.to_string()),
            ],
        )
        .await
    }

    async fn install_jps(&self, request: &JpsInstall) -> Result<Outcome> {
        self.call(
            "marketplace/jps",
            "install",
            &[
                ("jps", request.jps_url.clone()),
                ("envName", request.env_name.clone()),
                ("nodeGroup", request.node_group.clone()),
                ("settings", request.settings.to_string()),
                ("writeOutputTasks", "false".into()),
            ],
        )
        .await
    }

    async fn user_uid(&self) -> Result<u64> {
        #[derive(Deserialize)]
        struct UserInfo {
            #[serde(flatten)]
            status: Outcome,
            #[serde(default)]
            uid: u64,
        }

        let info: UserInfo = self.call("users/account", "getuserinfo", &[]).await?;
        if !info.status.is_ok() {
            anyhow::bail!("failed to get user info: {}", info.status.describe());
        }
        Ok(info.uid)
    }

    async fn write_log(&self, message: &str) -> Result<Outcome> {
        self.call(
            "marketplace/console",
            "writelog",
            &[("message", message.to_string())],
        )
        .await
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to download {url}"))?;
        if !response.status().is_success() {
            anyhow::bail!("failed to download {url}: {}", response.status());
        }
        response
            .text()
            .await
            .with_context(|| format!("failed to read {url}"))
    }
}

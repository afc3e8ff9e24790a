use anyhow::Result;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{command::Target, outcome::Outcome};

pub use jelastic::JelasticClient;

mod jelastic;

/// A node of the environment as reported by `GetEnvInfo`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: u64,
    #[serde(rename = "nodeGroup", default)]
    pub node_group: String,
    #[serde(default)]
    pub address: String,
    #[serde(rename = "extIPs", default)]
    pub ext_ips: Vec<String>,
    #[serde(default)]
    pub ismaster: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(rename = "isCustomSslSupport", default)]
    pub is_custom_ssl_support: Option<bool>,
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub nodemission: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvInfo {
    #[serde(flatten)]
    pub status: Outcome,
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileBody {
    #[serde(flatten)]
    pub status: Outcome,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScriptInfo {
    #[serde(flatten)]
    pub status: Outcome,
    #[serde(default)]
    pub script: Option<Script>,
}

/// Response of a script evaluation. `response` is whatever the script
/// returned.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EvalResponse {
    #[serde(flatten)]
    pub status: Outcome,
    #[serde(default)]
    pub response: Option<Value>,
}

impl EvalResponse {
    /// The script's own failure if the call succeeded but the script did
    /// not, otherwise the call status.
    pub fn into_outcome(self) -> Outcome {
        if self.status.is_ok() {
            if let Some(nested) = self
                .response
                .as_ref()
                .filter(|response| response.is_object())
                .and_then(|response| serde_json::from_value::<Outcome>(response.clone()).ok())
            {
                if !nested.is_ok() {
                    return nested;
                }
            }
        }
        self.status
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertBundle {
    pub key: String,
    pub cert: String,
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, bon::Builder)]
#[builder(on(String, into))]
pub struct SchedulerTask {
    pub script: String,
    pub trigger: String,
    pub description: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, bon::Builder)]
#[builder(on(String, into))]
pub struct JpsInstall {
    pub jps_url: String,
    pub env_name: String,
    pub node_group: String,
    pub settings: Value,
}

/// The hosting platform's API, as far as certificate management needs it.
#[enum_dispatch]
#[allow(async_fn_in_trait)]
pub trait PlatformApi {
    async fn get_env_info(&self, env_name: &str) -> Result<EnvInfo>;

    /// Run `command` as root on `target`.
    async fn exec_cmd(&self, env_name: &str, target: &Target, command: &str) -> Result<Outcome>;

    async fn attach_ext_ip(&self, env_name: &str, node_id: u64, legacy: bool) -> Result<Outcome>;

    async fn read_file(&self, env_name: &str, path: &str, node_id: Option<u64>)
        -> Result<FileBody>;

    async fn bind_ssl(&self, env_name: &str, bundle: &CertBundle) -> Result<Outcome>;

    async fn remove_ssl(&self, env_name: &str) -> Result<Outcome>;

    async fn send_email(&self, email: &Email) -> Result<Outcome>;

    async fn add_task(&self, task: &SchedulerTask) -> Result<Outcome>;

    /// Platform version without the build suffix, e.g. `5.9.7`.
    async fn version(&self) -> Result<String>;

    async fn get_script(&self, name: &str) -> Result<ScriptInfo>;

    async fn create_script(&self, name: &str, code: &str) -> Result<Outcome>;

    async fn delete_script(&self, name: &str) -> Result<Outcome>;

    async fn build_script(&self, name: &str) -> Result<Outcome>;

    async fn eval_script(&self, name: &str, params: &Value) -> Result<EvalResponse>;

    /// Call a method of the marketplace's own script.
    async fn eval_appstore(&self, method: &str, params: &Value) -> Result<EvalResponse>;

    async fn eval_code(&self, code: &str, params: &Value) -> Result<EvalResponse>;

    async fn install_jps(&self, request: &JpsInstall) -> Result<Outcome>;

    async fn user_uid(&self) -> Result<u64>;

    /// Write a line to the platform's marketplace console.
    async fn write_log(&self, message: &str) -> Result<Outcome>;

    /// Download a text document.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// A platform client.
#[derive(Debug)]
#[enum_dispatch(PlatformApi)]
pub enum PlatformClient {
    Jelastic(JelasticClient),
}

impl PlatformClient {
    pub fn new_jelastic(api_url: String, app_id: String, session: String) -> Result<Self> {
        Ok(Self::Jelastic(JelasticClient::new(api_url, app_id, session)?))
    }
}

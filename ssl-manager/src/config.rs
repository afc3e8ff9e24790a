use std::time::Duration;

use serde::Serialize;

use crate::installer::PATCH_BUILD;

pub const DEFAULT_MIN_PLATFORM_VERSION: &str = "4.9.5";
pub const DEFAULT_SUPPORT_EMAIL: &str = "support@jelastic.com";

/// Everything the installer needs to know about one add-on installation.
///
/// Serialized field names are the `${name}` placeholders available to the
/// platform script template.
#[derive(Debug, Clone, Serialize, bon::Builder)]
#[serde(rename_all = "camelCase")]
#[builder(on(String, into))]
pub struct InstallerConfig {
    /// Application id of the add-on on the platform.
    pub app_id: String,
    pub env_name: String,
    #[builder(default)]
    pub env_domain: String,
    #[builder(default)]
    pub env_appid: String,
    /// Where scripts, templates and the manifest are downloaded from.
    pub base_url: String,
    #[builder(default = "/".to_string())]
    pub base_dir: String,
    /// Name of the platform script driving the add-on.
    pub script_name: String,
    #[builder(default = "0 */12 * * *".to_string())]
    pub cron_time: String,
    #[builder(default)]
    pub email: String,
    /// Public host of the platform; used as the primary domain and for the
    /// auto-update URL.
    #[builder(default)]
    pub platform_host: String,
    #[serde(skip)]
    pub session: Option<String>,
    #[builder(default)]
    pub token: String,
    /// Invoked by the platform scheduler rather than by a user.
    #[builder(default)]
    pub is_task: bool,
    pub node_id: Option<u64>,
    pub node_ip: Option<String>,
    pub node_group: Option<String>,
    pub custom_domains: Option<String>,
    pub deploy_hook: Option<String>,
    pub deploy_hook_type: Option<String>,
    pub undeploy_hook: Option<String>,
    pub undeploy_hook_type: Option<String>,
    /// Request staging certificates.
    #[builder(default)]
    pub test: bool,
    /// Patch build of the installed platform script. Anything other than
    /// [`PATCH_BUILD`] marks a script from another release.
    #[builder(default = PATCH_BUILD)]
    pub patch_version: u32,
    /// Force the uninstall action.
    #[builder(default)]
    pub uninstall: bool,
    #[builder(default = DEFAULT_MIN_PLATFORM_VERSION.to_string())]
    pub min_platform_version: String,
    #[serde(skip)]
    #[builder(default = Duration::from_secs(1))]
    pub script_build_delay: Duration,
    #[builder(default = DEFAULT_SUPPORT_EMAIL.to_string())]
    pub support_email: String,
}

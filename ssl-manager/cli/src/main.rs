use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use documented::DocumentedFields;
use fs_err as fs;
use serde::{Deserialize, Serialize};
use ssl_manager::{
    installer::PATCH_BUILD, Installer, InstallerConfig, PlatformClient, WorkflowResult,
};
use toml_edit::ser::to_document;
use tracing::info;

const CONFIG_NAME: &str = "ssl-manager";
const DEFAULT_CONFIG: &str = include_str!("../ssl-manager.toml");

fn app_version() -> String {
    const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
    const VERSION: &str = git_version::git_version!(
        args = ["--abbrev=20", "--always", "--dirty=-modified"],
        prefix = "git:",
        fallback = "unknown"
    );
    format!("v{CARGO_PKG_VERSION} ({VERSION})")
}

#[derive(Parser)]
enum Command {
    /// Run an add-on action: install, uninstall, auto-update, backup-scripts or restore-scripts
    Run {
        /// Action name
        #[arg(short, long)]
        action: String,
        /// Access token
        #[arg(short, long)]
        token: Option<String>,
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the custom domains, create the platform script and install
    Setup {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate configuration template
    Cfg {
        /// Write to file
        #[arg(short, long)]
        write_to: Option<PathBuf>,
    },
}

#[derive(Parser)]
#[command(author, version, about, long_version = app_version())]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, DocumentedFields)]
struct Config {
    /// Platform API URL
    api_url: String,
    /// Platform session used for API calls. Token checks are skipped when set
    session: String,
    /// Application id of the add-on
    app_id: String,
    /// Environment name
    env_name: String,
    /// Default domain of the environment
    env_domain: String,
    /// Application id of the environment
    env_appid: String,
    /// URL the scripts, email templates and manifest are downloaded from
    base_url: String,
    /// Root of the node file system
    base_dir: String,
    /// Name of the platform script
    script_name: String,
    /// Crontab schedule of the auto-update
    cron_time: String,
    /// Operator email
    email: String,
    /// Platform host name
    platform_host: String,
    /// Token callers have to present
    token: String,
    /// Set when invoked by the platform scheduler
    is_task: bool,
    /// Node serving the challenges, 0 to select automatically
    node_id: u64,
    /// Address of the node serving the challenges
    node_ip: String,
    /// Entry point node group, empty to select automatically
    node_group: String,
    /// Custom domains separated by spaces, commas or semicolons
    custom_domains: String,
    /// Deploy hook, inline or a URL
    deploy_hook: String,
    /// Deploy hook type: js or shell
    deploy_hook_type: String,
    /// Undeploy hook, inline or a URL
    undeploy_hook: String,
    /// Undeploy hook type: js or shell
    undeploy_hook_type: String,
    /// Request staging certificates
    test: bool,
    /// Patch build of the installed platform script
    patch_version: u32,
    /// Run the uninstall action whatever action is requested
    uninstall: bool,
    /// Oldest platform version the auto-update runs on
    min_platform_version: String,
    /// Delay between creating and building the platform script
    #[serde(with = "serde_duration")]
    script_build_delay: Duration,
    /// Support address quoted in error emails
    support_email: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://app.jelastic.cloud".into(),
            session: "".into(),
            app_id: "letsencrypt-ssl-addon".into(),
            env_name: "".into(),
            env_domain: "".into(),
            env_appid: "".into(),
            base_url: "https://raw.githubusercontent.com/jelastic-jps/lets-encrypt/master".into(),
            base_dir: "/".into(),
            script_name: "".into(),
            cron_time: "0 */12 * * *".into(),
            email: "".into(),
            platform_host: "app.jelastic.cloud".into(),
            token: "".into(),
            is_task: false,
            node_id: 0,
            node_ip: "".into(),
            node_group: "".into(),
            custom_domains: "".into(),
            deploy_hook: "".into(),
            deploy_hook_type: "".into(),
            undeploy_hook: "".into(),
            undeploy_hook_type: "".into(),
            test: false,
            patch_version: PATCH_BUILD,
            uninstall: false,
            min_platform_version: "4.9.5".into(),
            script_build_delay: Duration::from_secs(1),
            support_email: "support@jelastic.com".into(),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.trim().is_empty())
}

impl Config {
    fn to_commented_toml(&self) -> Result<String> {
        let mut doc = to_document(self)?;

        for (i, (mut key, _value)) in doc.iter_mut().enumerate() {
            let decor = key.leaf_decor_mut();
            let docstring = Self::FIELD_DOCS[i];

            let mut comment = String::new();
            for line in docstring.lines() {
                let line = if line.is_empty() {
                    String::from("#\n")
                } else {
                    format!("# {line}\n")
                };
                comment.push_str(&line);
            }
            decor.set_prefix(comment);
        }
        Ok(doc.to_string())
    }

    fn load(leaf: Option<&Path>) -> Result<Self> {
        load_config::load_config(CONFIG_NAME, DEFAULT_CONFIG, leaf)?
            .extract()
            .context("invalid configuration")
    }

    fn platform(&self) -> Result<PlatformClient> {
        let app_id = non_empty(self.env_appid.clone()).unwrap_or_else(|| self.app_id.clone());
        PlatformClient::new_jelastic(self.api_url.clone(), app_id, self.session.clone())
    }

    fn installer_config(self) -> InstallerConfig {
        InstallerConfig::builder()
            .app_id(self.app_id)
            .env_name(self.env_name)
            .env_domain(self.env_domain)
            .env_appid(self.env_appid)
            .base_url(self.base_url)
            .base_dir(self.base_dir)
            .script_name(self.script_name)
            .cron_time(self.cron_time)
            .email(self.email)
            .platform_host(self.platform_host)
            .maybe_session(non_empty(self.session))
            .token(self.token)
            .is_task(self.is_task)
            .maybe_node_id(Some(self.node_id).filter(|id| *id != 0))
            .maybe_node_ip(non_empty(self.node_ip))
            .maybe_node_group(non_empty(self.node_group))
            .maybe_custom_domains(non_empty(self.custom_domains))
            .maybe_deploy_hook(non_empty(self.deploy_hook))
            .maybe_deploy_hook_type(non_empty(self.deploy_hook_type))
            .maybe_undeploy_hook(non_empty(self.undeploy_hook))
            .maybe_undeploy_hook_type(non_empty(self.undeploy_hook_type))
            .test(self.test)
            .patch_version(self.patch_version)
            .uninstall(self.uninstall)
            .min_platform_version(self.min_platform_version)
            .script_build_delay(self.script_build_delay)
            .support_email(self.support_email)
            .build()
    }
}

fn build_installer(config: Option<&Path>) -> Result<Installer> {
    let config = Config::load(config).context("Failed to load configuration")?;
    let platform = config.platform().context("Failed to create platform client")?;
    Ok(Installer::new(config.installer_config(), platform))
}

fn report(result: &WorkflowResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    if !result.is_ok() {
        bail!(
            "failed with result {}: {}",
            result.result,
            result
                .message
                .as_deref()
                .or(result.error.as_deref())
                .unwrap_or("no details")
        );
    }
    Ok(())
}

/// A missing token is presented as an empty one.
fn authorize(installer: &mut Installer, token: Option<&str>) -> Result<()> {
    let auth = installer.auth(token.unwrap_or_default());
    if !auth.is_ok() {
        bail!("{}", auth.describe());
    }
    Ok(())
}

async fn run(action: &str, token: Option<String>, config: Option<&Path>) -> Result<()> {
    let mut installer = build_installer(config)?;
    authorize(&mut installer, token.as_deref())?;
    info!(action, "invoking");
    let result = installer.invoke(action).await;
    report(&result)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    {
        use tracing_subscriber::{fmt, EnvFilter};
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let args = Args::parse();
    match args.command {
        Command::Run {
            action,
            token,
            config,
        } => {
            run(&action, token, config.as_deref()).await?;
        }
        Command::Setup { config } => {
            let mut installer = build_installer(config.as_deref())?;
            let result = installer.create_script_and_install().await;
            report(&result)?;
        }
        Command::Cfg { write_to } => {
            let toml_str = Config::default().to_commented_toml()?;
            match write_to {
                Some(path) => fs::write(path, toml_str)?,
                None => println!("{}", toml_str),
            }
        }
    }
    Ok(())
}

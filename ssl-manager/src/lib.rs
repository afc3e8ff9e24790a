//! Let's Encrypt certificate lifecycle for hosted environments.
//!
//! The [`Installer`] issues, renews and removes certificates for an
//! environment by running shell steps on its nodes through a
//! [`PlatformApi`], mailing the operator about the result.
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use ssl_manager::{Action, Installer, InstallerConfig, PlatformClient};
//!
//! let config = InstallerConfig::builder()
//!     .app_id("letsencrypt-ssl")
//!     .env_name("env-1")
//!     .base_url("https://cdn.example.com/addon")
//!     .script_name("letsencrypt-ssl-env-1")
//!     .token("secret")
//!     .build();
//! let platform = PlatformClient::new_jelastic(
//!     "https://app.jelastic.cloud".into(),
//!     config.app_id.clone(),
//!     "session".into(),
//! )?;
//! let mut installer = Installer::new(config, platform);
//! let result = installer.run(Action::Install).await;
//! println!("{}", result.result);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod command;
pub mod config;
pub mod domains;
pub mod error;
pub mod installer;
pub mod node_manager;
pub mod notification;
pub mod outcome;
pub mod platform;
pub mod sequencer;
pub mod settings;
pub mod template;

pub use action::Action;
pub use config::InstallerConfig;
pub use error::Error;
pub use installer::Installer;
pub use outcome::{Outcome, WorkflowResult};
pub use platform::{PlatformApi, PlatformClient};

//! Operator email notifications.
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rand::Rng;

use crate::{
    domains,
    outcome::Outcome,
    platform::{Email, PlatformApi},
    template::{self, DOCUMENT},
};

const SETTINGS_HELP_URL: &str = "https://jelastic.com/blog/free-ssl-certificates-with-lets-encrypt/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Installed,
    Updated,
    Error,
    ActionRequired,
}

impl Notice {
    pub fn title(self) -> &'static str {
        match self {
            Notice::Installed => "Successful Installation",
            Notice::Updated => "Successful Update",
            Notice::Error => "Error",
            Notice::ActionRequired => "Action Required",
        }
    }

    /// Template path relative to the base URL.
    pub fn template(self) -> &'static str {
        match self {
            Notice::Installed | Notice::Updated => "html/update-success.html",
            Notice::Error => "html/update-error.html",
            Notice::ActionRequired => "html/update-required.html",
        }
    }
}

/// URL of a file under `base_url`, with a cache-busting query.
pub fn file_url(base_url: &str, path: &str) -> String {
    let nonce: f64 = rand::thread_rng().gen();
    format!("{}/{path}?_r={nonce}", base_url.trim_end_matches('/'))
}

pub fn subject(notice: Notice, env_domain: &str) -> String {
    format!("{}: Let's Encrypt SSL at {env_domain}", notice.title())
}

/// Values for the success template.
pub fn success_values(
    env_domain: &str,
    is_update: bool,
    custom_domains: &str,
    skipped_domains: &str,
) -> BTreeMap<&'static str, String> {
    let action = if is_update { "updated" } else { "installed" };
    let skipped = if skipped_domains.is_empty() {
        String::new()
    } else {
        format!(
            "<br><br>Please note that Let’s Encrypt cannot assign SSL certificates for the following domain names: <b>{}</b>.<br>\
             You can fix the issues with DNS records (IP addresses) via your domain admin panel or by removing invalid custom domains from <a href='{SETTINGS_HELP_URL}'>Let's Encrypt settings</a>.",
            domains::format_inline(skipped_domains)
        )
    };
    BTreeMap::from([
        ("ENVIRONMENT", env_domain.to_string()),
        ("ACTION", action.to_string()),
        (
            "UPDATED_DOMAINS",
            format!(
                "Successfully {action} custom domains: <b>{}</b>",
                domains::format_links(custom_domains)
            ),
        ),
        ("SKIPPED_DOMAINS", skipped),
    ])
}

/// Explanation used instead of the raw failure when every custom domain
/// was refused.
pub fn dns_failure_explanation(env_domain: &str) -> String {
    format!(
        "Please note that the SSL certificates cannot be assigned to the available custom domains due to incorrect DNS settings.\n\n\
         You can fix the issues with DNS records (IP addresses) via your domain admin panel or by removing invalid custom domains from Let's Encrypt settings.\n\n\
         In case you no longer require SSL certificates within <b>{env_domain}</b> environment, feel free to delete Let’s Encrypt add-on to stop receiving error messages."
    )
}

pub fn error_values(support_email: &str, response: String) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("SUPPORT_EMAIL", support_email.to_string()),
        ("RESP", response),
    ])
}

/// Markdown note listing domains the certificate was not issued for.
pub fn skipped_domains_note(skipped_domains: &str) -> Option<String> {
    if skipped_domains.trim().is_empty() {
        return None;
    }
    Some(format!(
        ">**Note:** The Let’s Encrypt SSL was not issued for the following domain names: \n > * {}\n > \n > \
         Fix their DNS records via your domain registrar admin panel, and reinstall/update the add-on or remove them from the [Let's Encrypt]({SETTINGS_HELP_URL}) settings.",
        domains::format_markdown_list(skipped_domains)
    ))
}

/// Renders templates fetched from the base URL and mails them to the
/// operator.
pub struct Notifier<'a, P> {
    pub platform: &'a P,
    pub base_url: &'a str,
    pub to: &'a str,
    pub env_domain: &'a str,
}

impl<P: PlatformApi> Notifier<'_, P> {
    pub async fn send(
        &self,
        notice: Notice,
        values: &BTreeMap<&'static str, String>,
    ) -> Result<Outcome> {
        let url = file_url(self.base_url, notice.template());
        let html = self
            .platform
            .fetch(&url)
            .await
            .with_context(|| format!("failed to fetch email template {}", notice.template()))?;
        let html = template::render(&html, DOCUMENT, |name| values.get(name).cloned());
        let email = Email {
            to: self.to.to_string(),
            subject: subject(notice, self.env_domain),
            html,
        };
        self.platform
            .send_email(&email)
            .await
            .context("failed to send email")
    }
}

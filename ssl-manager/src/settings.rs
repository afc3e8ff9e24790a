//! The certificate tool's settings file on the node.
use std::collections::BTreeMap;

/// Settings the tool reads when it requests certificates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeSettings {
    /// Domains in argument form (`a.com -d b.com`).
    pub domain: String,
    pub email: String,
    pub appid: String,
    pub appdomain: String,
    pub base_dir: String,
    pub test: bool,
    pub primary_domain: String,
}

impl LeSettings {
    pub fn render(&self) -> String {
        [
            ("domain", self.domain.as_str()),
            ("email", self.email.as_str()),
            ("appid", self.appid.as_str()),
            ("appdomain", self.appdomain.as_str()),
            ("baseDir", self.base_dir.as_str()),
            ("test", if self.test { "true" } else { "false" }),
            ("primarydomain", self.primary_domain.as_str()),
        ]
        .iter()
        .map(|(key, value)| format!("{key}='{value}'"))
        .collect::<Vec<_>>()
        .join("\n")
    }

    /// The rendered file, escaped for `printf "<here>"`.
    pub fn render_for_printf(&self) -> String {
        let mut escaped = String::new();
        for c in self.render().chars() {
            match c {
                '%' => escaped.push_str("%%"),
                '\\' => escaped.push_str("\\\\\\\\"),
                '"' | '$' | '`' => {
                    escaped.push('\\');
                    escaped.push(c);
                }
                c => escaped.push(c),
            }
        }
        escaped
    }
}

/// Parse `key='value'` lines. Quotes around values are dropped.
pub fn parse_settings(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.trim().split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().replace('\'', "")))
        .collect()
}

/// What the tool recorded after a certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuedDomains {
    /// Domains the certificate was issued for, in argument form.
    pub domains: String,
    /// Domains the certificate authority refused, in argument form.
    pub skipped: String,
}

impl IssuedDomains {
    pub fn from_settings(text: &str) -> Self {
        let mut settings = parse_settings(text);
        Self {
            domains: settings.remove("domain").unwrap_or_default(),
            skipped: settings.remove("skipped_domains").unwrap_or_default(),
        }
    }
}

//! Custom domain lists: parsing, validation and formatting.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;

/// Optional `*.` wildcard, one or more DNS labels, then a 2..24 char TLD.
const HOSTNAME_PATTERN: &str =
    r"^(\*\.)?([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z0-9-]{2,24}$";

static HOSTNAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(HOSTNAME_PATTERN).expect("hostname pattern is valid"));

/// Split a user supplied domain list on whitespace, commas and semicolons.
pub fn parse_domains(input: &str) -> Vec<String> {
    input
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
        .filter(|domain| !domain.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse and validate a domain list. The first invalid entry rejects the
/// whole list.
pub fn validate_domains(input: &str) -> Result<Vec<String>, Error> {
    let domains = parse_domains(input);
    if let Some(invalid) = domains.iter().find(|domain| !HOSTNAME.is_match(domain)) {
        return Err(Error::InvalidDomain(invalid.clone()));
    }
    Ok(domains)
}

/// Domain list in the tool's argument form: `a.com -d b.com -d c.com`.
pub fn to_domain_args(domains: &[String]) -> String {
    domains.join(" -d ")
}

/// Inverse of [`to_domain_args`], tolerating a leading `-d` and any spacing.
pub fn from_domain_args(args: &str) -> Vec<String> {
    args.split_whitespace()
        .filter(|token| *token != "-d")
        .map(str::to_string)
        .collect()
}

/// `a.com, b.com`
pub fn format_inline(args: &str) -> String {
    from_domain_args(args).join(", ")
}

/// Markdown bullet list body, continuing a block quote.
pub fn format_markdown_list(args: &str) -> String {
    from_domain_args(args).join("\n > * ")
}

/// Comma separated HTML links to every domain.
pub fn format_links(args: &str) -> String {
    from_domain_args(args)
        .iter()
        .map(|domain| format!("<a href=\"https://{domain}/\">{domain}</a>"))
        .collect::<Vec<_>>()
        .join(", ")
}

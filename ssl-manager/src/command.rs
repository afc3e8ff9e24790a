use std::{collections::BTreeMap, fmt};

use crate::{
    error::Error,
    template::{self, COMMAND},
};

/// Where a remote command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(u64),
    Group(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Node(id) => write!(f, "node {id}"),
            Target::Group(group) => write!(f, "group {group}"),
        }
    }
}

/// Builds a command line from `%(name)` templates.
///
/// Every placeholder has to be bound before [`CommandBuilder::build`]
/// succeeds; an unbound placeholder is an error rather than an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    lines: Vec<String>,
    separator: &'static str,
    values: BTreeMap<String, String>,
    group: Option<String>,
}

impl CommandBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self::lines([template.into()])
    }

    /// Several command lines joined with ` && `.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            separator: " && ",
            values: BTreeMap::new(),
            group: None,
        }
    }

    pub fn separator(mut self, separator: &'static str) -> Self {
        self.separator = separator;
        self
    }

    pub fn value(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    /// Bind `name` unless it is already bound.
    pub fn default_value(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.values
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
        self
    }

    /// Run on every node of `group` instead of the current node.
    pub fn on_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn template(&self) -> String {
        self.lines.join(self.separator)
    }

    pub fn build(&self) -> Result<String, Error> {
        let template = self.template();
        if let Some(missing) = template::placeholders(&template, COMMAND)
            .into_iter()
            .find(|name| !self.values.contains_key(*name))
        {
            return Err(Error::MissingPlaceholder(missing.to_string()));
        }
        Ok(template::render(&template, COMMAND, |name| {
            self.values.get(name).cloned()
        }))
    }
}

impl fmt::Display for CommandBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.template())?;
        if !self.values.is_empty() {
            write!(f, ", {:?}", self.values)?;
        }
        Ok(())
    }
}

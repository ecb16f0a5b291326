//! Parsers for the answers of the `status` and `uptime` commands.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

/// One detail value of a [`ModuleStatus`] report.
///
/// When the module declares a `format` attribute, the `|`-separated
/// value is broken up into one field per declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detail {
    /// The value as reported, no format was declared.
    Raw(String),
    /// The value split along the declared `format` columns.
    Fields(HashMap<String, String>),
}

/// The status report of one module, as three `;`-separated groups of
/// comma-delimited `key=value` attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStatus {
    /// Static description of the module, like `name` or `format`.
    pub definition: HashMap<String, String>,
    /// Current counters of the module, like `cdrs` or `hungup`.
    pub status: HashMap<String, String>,
    /// Per-entity details, keyed by entity (a channel, a route, …).
    pub details: HashMap<String, Detail>,
}

fn attributes(group: &str) -> HashMap<String, String> {
    if group.is_empty() {
        return HashMap::new();
    }

    group
        .split(',')
        .map(|attribute| match attribute.split_once('=') {
            Some((key, value)) => (key.into(), value.into()),
            None => (attribute.into(), String::new()),
        })
        .collect()
}

/// Parse one line of a `status` answer.
pub(super) fn module_status(line: &str) -> ModuleStatus {
    let (definition, rest) = line.split_once(';').unwrap_or((line, ""));
    let (status, details) = rest.split_once(';').unwrap_or((rest, ""));

    let definition = attributes(definition);
    let format = definition
        .get("format")
        .map(|format| format.split('|').collect::<Vec<_>>());

    let details = attributes(details)
        .into_iter()
        .map(|(entity, value)| {
            let detail = match &format {
                Some(columns) => Detail::Fields(
                    columns
                        .iter()
                        .zip(value.split('|'))
                        .map(|(column, value)| ((*column).into(), value.into()))
                        .collect(),
                ),
                None => Detail::Raw(value),
            };

            (entity, detail)
        })
        .collect();

    ModuleStatus {
        status: attributes(status),
        details,
        definition,
    }
}

/// Engine load figures reported by `uptime`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uptime {
    /// Total time the engine has been up, in seconds.
    pub total: u64,
    /// Accumulated user-space CPU time, in seconds.
    pub user: f64,
    /// Accumulated kernel-space CPU time, in seconds.
    pub kernel: f64,
}

static UPTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Uptime: \d+ \d{2}:\d{2}:\d{2} \((?P<total>\d+)\) user: (?P<user>\d+\.\d{3}) kernel: (?P<kernel>\d+\.\d{3})$",
    )
    .expect("the uptime pattern is well-formed")
});

/// Parse the single-line answer of `uptime`.
pub(super) fn uptime(line: &str) -> Option<Uptime> {
    let captures = UPTIME.captures(line)?;

    Some(Uptime {
        total: captures["total"].parse().ok()?,
        user: captures["user"].parse().ok()?,
        kernel: captures["kernel"].parse().ok()?,
    })
}

//! [`Command`] to wire line rendering.

use std::fmt::Display;

use super::{Command, KeyValueList, upcode};

/// One line of wire traffic under construction: the keyword, then every
/// declared field joined by `:`. Unset fields render as empty segments
/// and trailing empties are kept, so field positions always line up.
struct Line {
    out: String,
}

impl Line {
    fn new(keyword: &str) -> Self {
        Self {
            out: keyword.into(),
        }
    }

    /// A raw string field, written verbatim.
    fn raw(mut self, value: &str) -> Self {
        self.out.push(':');
        self.out.push_str(value);
        self
    }

    /// An up-coded string field.
    fn encoded(mut self, value: &str) -> Self {
        self.out.push(':');
        self.out.push_str(&upcode::encode(value));
        self
    }

    fn encoded_opt(self, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.encoded(value),
            None => self.raw(""),
        }
    }

    /// An integer, boolean or timestamp field, serialized as
    /// its canonical text form.
    fn plain(mut self, value: impl Display) -> Self {
        self.out.push(':');
        self.out.push_str(&value.to_string());
        self
    }

    fn plain_opt(self, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.plain(value),
            None => self.raw(""),
        }
    }

    fn kvp(self, kvp: &KeyValueList) -> Self {
        self.plain(kvp)
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Render a [`Command`] into a single wire line,
/// without the terminating newline.
pub fn to_string(command: &Command) -> String {
    let keyword = command.keyword();

    match command {
        Command::Connect(cmd) => Line::new(keyword)
            .plain(cmd.role)
            .encoded_opt(cmd.id.as_deref())
            .encoded_opt(cmd.kind.as_deref())
            .finish(),

        Command::ErrorIn(cmd) => Line::new(keyword).raw(&cmd.original).finish(),

        Command::Install(cmd) => Line::new(keyword)
            .plain_opt(cmd.priority)
            .encoded(&cmd.name)
            .encoded_opt(cmd.filter.as_ref().map(|filter| filter.name.as_str()))
            .encoded_opt(
                cmd.filter
                    .as_ref()
                    .and_then(|filter| filter.value.as_deref()),
            )
            .finish(),

        Command::InstallAck(cmd) => Line::new(keyword)
            .plain(cmd.priority)
            .encoded(&cmd.name)
            .plain(cmd.success)
            .finish(),

        Command::Message(cmd) => Line::new(keyword)
            .encoded(&cmd.id)
            .plain(cmd.time)
            .encoded(&cmd.name)
            .encoded_opt(cmd.retvalue.as_deref())
            .kvp(&cmd.kvp)
            .finish(),

        Command::MessageAck(cmd) => Line::new(keyword)
            .encoded(&cmd.id)
            .plain(cmd.processed)
            .encoded_opt(cmd.name.as_deref())
            .encoded_opt(cmd.retvalue.as_deref())
            .kvp(&cmd.kvp)
            .finish(),

        Command::Output(cmd) => Line::new(keyword).raw(&cmd.text).finish(),

        Command::SetLocal(cmd) => Line::new(keyword)
            .encoded(&cmd.name)
            .encoded_opt(cmd.value.as_deref())
            .finish(),

        Command::SetLocalAck(cmd) => Line::new(keyword)
            .encoded(&cmd.name)
            .encoded(&cmd.value)
            .plain(cmd.success)
            .finish(),

        Command::Uninstall(cmd) => Line::new(keyword).encoded(&cmd.name).finish(),

        Command::UninstallAck(cmd) => Line::new(keyword)
            .plain(cmd.priority)
            .encoded(&cmd.name)
            .plain(cmd.success)
            .finish(),

        Command::Unwatch(cmd) => Line::new(keyword).encoded(&cmd.name).finish(),

        Command::UnwatchAck(cmd) => Line::new(keyword)
            .encoded(&cmd.name)
            .plain(cmd.success)
            .finish(),

        Command::Watch(cmd) => Line::new(keyword).encoded(&cmd.name).finish(),

        Command::WatchAck(cmd) => Line::new(keyword)
            .encoded(&cmd.name)
            .plain(cmd.success)
            .finish(),
    }
}

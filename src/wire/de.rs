//! Wire line to [`Command`] parsing.

use super::{
    Command, Connect, ConnectRole, ErrorIn, Error, Filter, Install, InstallAck, KeyValueList,
    Message, MessageAck, Output, Result, SetLocal, SetLocalAck, Uninstall, UninstallAck, Unwatch,
    UnwatchAck, Watch, WatchAck, upcode,
};

/// Positional cursor over the `:`-separated fields of one command,
/// applying the declared semantic type of each field as it is consumed.
///
/// The cursor is built with the command's field count so the last field
/// absorbs any surplus colons.
struct Fields<'line> {
    keyword: &'static str,
    parts: std::str::SplitN<'line, char>,
}

impl<'line> Fields<'line> {
    fn new(keyword: &'static str, fields: &'line str, count: usize) -> Self {
        Self {
            keyword,
            parts: fields.splitn(count, ':'),
        }
    }

    fn next(&mut self) -> Option<&'line str> {
        self.parts.next()
    }

    fn missing(&self, field: &'static str) -> Error {
        Error::MissingField {
            keyword: self.keyword,
            field,
        }
    }

    fn invalid(&self, field: &'static str, value: &str) -> Error {
        Error::InvalidField {
            keyword: self.keyword,
            field,
            value: value.into(),
        }
    }

    /// A required up-coded string, which must not be empty.
    fn encoded(&mut self, field: &'static str) -> Result<String> {
        match self.next() {
            None | Some("") => Err(self.missing(field)),
            Some(value) => Ok(upcode::decode(value)?.into_owned()),
        }
    }

    /// An optional up-coded string, empty stands for unset.
    fn encoded_opt(&mut self) -> Result<Option<String>> {
        match self.next() {
            None | Some("") => Ok(None),
            Some(value) => Ok(Some(upcode::decode(value)?.into_owned())),
        }
    }

    fn integer(&mut self, field: &'static str) -> Result<u64> {
        match self.next() {
            None | Some("") => Err(self.missing(field)),
            Some(value) => value.parse().map_err(|_| self.invalid(field, value)),
        }
    }

    fn integer_opt(&mut self, field: &'static str) -> Result<Option<u64>> {
        match self.next() {
            None | Some("") => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(field, value)),
        }
    }

    fn boolean(&mut self, field: &'static str) -> Result<bool> {
        match self.next() {
            None | Some("") => Err(self.missing(field)),
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(value) => Err(self.invalid(field, value)),
        }
    }

    /// Seconds since the Unix epoch, UTC.
    fn datetime(&mut self, field: &'static str) -> Result<u64> {
        self.integer(field)
    }

    fn kvp(&mut self) -> Result<KeyValueList> {
        KeyValueList::parse(self.next().unwrap_or_default())
    }

    /// The rest of the line, verbatim.
    fn raw(&mut self) -> String {
        self.next().unwrap_or_default().into()
    }
}

/// Parse a single wire line into a [`Command`].
///
/// The keyword is split off at the first `:`; the remainder is assigned
/// positionally to the fields declared for that kind of command.
pub fn from_str(line: &str) -> Result<Command> {
    let (keyword, fields) = line
        .split_once(':')
        .ok_or_else(|| Error::UnknownKeyword(line.into()))?;

    match keyword {
        Connect::KEYWORD => {
            let mut fields = Fields::new(Connect::KEYWORD, fields, 3);

            let role = fields.encoded("role")?;
            Ok(Command::Connect(Connect {
                role: role
                    .parse::<ConnectRole>()
                    .map_err(|()| fields.invalid("role", &role))?,
                id: fields.encoded_opt()?,
                kind: fields.encoded_opt()?,
            }))
        }

        ErrorIn::KEYWORD => {
            let mut fields = Fields::new(ErrorIn::KEYWORD, fields, 1);

            Ok(Command::ErrorIn(ErrorIn {
                original: fields.raw(),
            }))
        }

        Install::KEYWORD => {
            let mut fields = Fields::new(Install::KEYWORD, fields, 4);

            Ok(Command::Install(Install {
                priority: fields.integer_opt("priority")?,
                name: fields.encoded("name")?,
                filter: match (fields.encoded_opt()?, fields.encoded_opt()?) {
                    (Some(name), value) => Some(Filter { name, value }),
                    (None, _) => None,
                },
            }))
        }

        InstallAck::KEYWORD => {
            let mut fields = Fields::new(InstallAck::KEYWORD, fields, 3);

            Ok(Command::InstallAck(InstallAck {
                priority: fields.integer("priority")?,
                name: fields.encoded("name")?,
                success: fields.boolean("success")?,
            }))
        }

        Message::KEYWORD => {
            let mut fields = Fields::new(Message::KEYWORD, fields, 5);

            Ok(Command::Message(Message {
                id: fields.encoded("id")?,
                time: fields.datetime("time")?,
                name: fields.encoded("name")?,
                retvalue: fields.encoded_opt()?,
                kvp: fields.kvp()?,
            }))
        }

        MessageAck::KEYWORD => {
            let mut fields = Fields::new(MessageAck::KEYWORD, fields, 5);

            Ok(Command::MessageAck(MessageAck {
                // an empty id is a watcher notification
                id: fields.encoded_opt()?.unwrap_or_default(),
                processed: fields.boolean("processed")?,
                name: fields.encoded_opt()?,
                retvalue: fields.encoded_opt()?,
                kvp: fields.kvp()?,
            }))
        }

        Output::KEYWORD => {
            let mut fields = Fields::new(Output::KEYWORD, fields, 1);

            Ok(Command::Output(Output { text: fields.raw() }))
        }

        SetLocal::KEYWORD => {
            let mut fields = Fields::new(SetLocal::KEYWORD, fields, 2);

            Ok(Command::SetLocal(SetLocal {
                name: fields.encoded("name")?,
                value: fields.encoded_opt()?,
            }))
        }

        SetLocalAck::KEYWORD => {
            let mut fields = Fields::new(SetLocalAck::KEYWORD, fields, 3);

            Ok(Command::SetLocalAck(SetLocalAck {
                name: fields.encoded("name")?,
                // queried parameters may well hold an empty value
                value: fields.encoded_opt()?.unwrap_or_default(),
                success: fields.boolean("success")?,
            }))
        }

        Uninstall::KEYWORD => {
            let mut fields = Fields::new(Uninstall::KEYWORD, fields, 1);

            Ok(Command::Uninstall(Uninstall {
                name: fields.encoded("name")?,
            }))
        }

        UninstallAck::KEYWORD => {
            let mut fields = Fields::new(UninstallAck::KEYWORD, fields, 3);

            Ok(Command::UninstallAck(UninstallAck {
                priority: fields.integer("priority")?,
                name: fields.encoded("name")?,
                success: fields.boolean("success")?,
            }))
        }

        Unwatch::KEYWORD => {
            let mut fields = Fields::new(Unwatch::KEYWORD, fields, 1);

            Ok(Command::Unwatch(Unwatch {
                name: fields.encoded("name")?,
            }))
        }

        UnwatchAck::KEYWORD => {
            let mut fields = Fields::new(UnwatchAck::KEYWORD, fields, 2);

            Ok(Command::UnwatchAck(UnwatchAck {
                name: fields.encoded("name")?,
                success: fields.boolean("success")?,
            }))
        }

        Watch::KEYWORD => {
            let mut fields = Fields::new(Watch::KEYWORD, fields, 1);

            Ok(Command::Watch(Watch {
                name: fields.encoded("name")?,
            }))
        }

        WatchAck::KEYWORD => {
            let mut fields = Fields::new(WatchAck::KEYWORD, fields, 2);

            Ok(Command::WatchAck(WatchAck {
                name: fields.encoded("name")?,
                success: fields.boolean("success")?,
            }))
        }

        _ => Err(Error::UnknownKeyword(line.into())),
    }
}

//! Format of messages in the Yate Engine external module protocol.
//!
//! ## Format of commands and notifications
//!
//! Every command is sent on its own newline (`\n`, `^J`, decimal `10`) delimited line.
//!
//! Any value that contains special characters (ASCII `<32`)
//! MUST have them converted to `%<upcode>` where `<upcode>` is the character
//! with a numeric value equal with `64 + original ASCII code`.
//!
//! The `%` character itself MUST be converted to a special `%%` representation.
//! Characters with codes `>=32` (except `%`) SHOULD not be escaped but may be so.
//!
//! A `%`-escaped code may be received instead of an unescaped character anywhere
//! except in the initial keyword or the delimiting colon (`:`) characters.
//!
//! Fields are assigned positionally; empty segments stand for unset optional
//! fields and trailing empty segments are kept when rendering so positions
//! always line up. The last field of a command absorbs any surplus colons,
//! which is what keeps raw text and `key=value` enumerations in one piece.
//!
//! ## Command direction
//! Command direction is anotated by the following prefixes in the
//! structures documentations:
//! - **(>)**: _Application_ to _Engine_
//! - **(<)**: _Engine_ to _Application_
//! - **(~)**: _Bi_-directional

use std::{fmt, str::FromStr};

mod error;
pub use error::{Error, Result};

pub mod upcode;

mod kvp;
pub use kvp::KeyValueList;

mod de;
pub use de::from_str;

mod ser;
pub use ser::to_string;


/// **(<)** The engine sends this notification as answer to a syntactically
/// incorrect line it received from the application.
///
/// Note: _The external module SHOULD NOT send anything back to Yate
/// in response to such a notification as it can result in an infinite loop._
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorIn {
    /// The original line exactly as received (not escaped or something).
    pub original: String,
}

impl ErrorIn {
    pub(crate) const KEYWORD: &'static str = "Error in";
}

/// Role of a [`Connect`]ed socket interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRole {
    /// Global module, receives and dispatches messages.
    Global,
    /// Channel module, attached to a single call leg.
    Channel,
    /// Audio playback data connection.
    Play,
    /// Audio recording data connection.
    Record,
    /// Bidirectional audio data connection.
    PlayRec,
}

impl ConnectRole {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Channel => "channel",
            Self::Play => "play",
            Self::Record => "record",
            Self::PlayRec => "playrec",
        }
    }
}

impl fmt::Display for ConnectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectRole {
    type Err = ();

    fn from_str(role: &str) -> Result<Self, Self::Err> {
        match role {
            "global" => Ok(Self::Global),
            "channel" => Ok(Self::Channel),
            "play" => Ok(Self::Play),
            "record" => Ok(Self::Record),
            "playrec" => Ok(Self::PlayRec),
            _ => Err(()),
        }
    }
}

/// **(>)** The [`Connect`] command is used only by
/// external modules that attach to the socket interface.
///
/// As the connection is initiated from the external module
/// the engine must be informed on the role of the connection.
/// This must be the first command sent over a newly
/// established socket connection.
///
/// There is no answer to this command, if it fails
/// the engine will slam the connection shut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    /// Role of this connection.
    pub role: ConnectRole,

    /// Channel id to connect this socket to.
    pub id: Option<String>,

    /// Type of data channel, assuming `audio` if `None`.
    pub kind: Option<String>,
}

impl Connect {
    pub(crate) const KEYWORD: &'static str = "%%>connect";
}

/// Filter restricting an [`Install`]ed handler to messages where
/// a given parameter holds a given value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Name of the variable the handler will filter on.
    pub name: String,

    /// Matching value for the filtered variable.
    pub value: Option<String>,
}

/// **(>)** Requests the installing of a message **handler**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Install {
    /// Priority in chain, use default (`100`) if `None`.
    pub priority: Option<u64>,

    /// Name of the messages for that a handler should be installed.
    pub name: String,

    /// Filter for the installed handler.
    pub filter: Option<Filter>,
}

impl Install {
    pub(crate) const KEYWORD: &'static str = "%%>install";
}

/// **(<)** Confirmation that the **handler**
/// has been installed properly or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallAck {
    /// Priority of the installed handler.
    pub priority: u64,

    /// Name of the messages asked to handle.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl InstallAck {
    pub(crate) const KEYWORD: &'static str = "%%<install";
}

/// **(~)** A message traveling through the engine, either generated by us
/// for dispatching or received for processing by an installed handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Obscure unique id of the message, chosen by the sender.
    pub id: String,

    /// Time the message was initially created, in seconds since the Unix epoch.
    pub time: u64,

    /// Name of the message.
    pub name: String,

    /// Default textual return value of the message.
    pub retvalue: Option<String>,

    /// Enumeration of the key-value pairs of the message.
    pub kvp: KeyValueList,
}

impl Message {
    pub(crate) const KEYWORD: &'static str = "%%>message";

    /// Build the acknowledgement for this message, echoing its fields
    /// and leaving it unprocessed; tweak the ack's fields to override
    /// the message's name, return value or parameters.
    ///
    /// The ack's key-value pairs fully replace the message's on the
    /// engine side; to delete one, include its key with an empty value.
    pub fn ack(&self) -> MessageAck {
        MessageAck {
            id: self.id.clone(),
            processed: false,
            name: Some(self.name.clone()),
            retvalue: self.retvalue.clone(),
            kvp: self.kvp.clone(),
        }
    }
}

/// **(~)** Acknowledgement of a [`Message`], either ours for a message
/// received from the engine, or the engine's for a message we generated.
///
/// Watcher notifications arrive as this command with an empty `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAck {
    /// Id of the acknowledged message, empty on watcher notifications.
    pub id: String,

    /// Whether the message has been processed or should be passed
    /// to the next handler in chain.
    pub processed: bool,

    /// New name of the message, unchanged if `None`.
    pub name: Option<String>,

    /// New textual return value of the message.
    pub retvalue: Option<String>,

    /// New key-value pairs to set in the message.
    pub kvp: KeyValueList,
}

impl MessageAck {
    pub(crate) const KEYWORD: &'static str = "%%<message";
}

/// **(>)** Relays arbitrary text to the engine's logging output.
///
/// This is the proper way of logging for modules attached to the socket
/// interface as they may not have their standard error redirected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Arbitrary unescaped string.
    pub text: String,
}

impl Output {
    pub(crate) const KEYWORD: &'static str = "%%>output";
}

/// **(>)** Requests the change of a **local parameter**,
/// or just queries its current value when `value` is `None`.
///
/// Some notable writable parameters:
/// - `trackparam` (string) - Set the message handler tracking name, cannot be made empty
/// - `timeout` (int) - Timeout in milliseconds for answering to messages
/// - `bufsize` (int) - Length of the incoming line buffer (default 8192)
/// - `reenter` (bool) - If this module is allowed to handle messages generated by itself
/// - `selfwatch` (bool) - If this module is allowed to watch messages generated by itself
/// - `restart` (bool) - Restart this global module if it terminates unexpectedly.
///   Must be turned off to allow normal termination
///
/// And read-only ones, like `engine.version`, `engine.nodename`,
/// `engine.runid` or `config.<section>.<key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetLocal {
    /// Name of the parameter to modify.
    pub name: String,

    /// New value to set in the local module instance, `None` to just query.
    pub value: Option<String>,
}

impl SetLocal {
    pub(crate) const KEYWORD: &'static str = "%%>setlocal";
}

/// **(<)** Confirmation that the **local parameter**
/// has been changed successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetLocalAck {
    /// Name of the modified parameter.
    pub name: String,

    /// Value of the local parameter.
    pub value: String,

    /// Success of operation.
    pub success: bool,
}

impl SetLocalAck {
    pub(crate) const KEYWORD: &'static str = "%%<setlocal";
}

/// **(>)** Requests uninstalling a previously installed message **handler**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uninstall {
    /// Name of the message handler that should be uninstalled.
    pub name: String,
}

impl Uninstall {
    pub(crate) const KEYWORD: &'static str = "%%>uninstall";
}

/// **(<)** Confirmation that the **handler**
/// has been uninstalled properly or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallAck {
    /// Priority of the previously installed handler.
    pub priority: u64,

    /// Name of the message handler asked to uninstall.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl UninstallAck {
    pub(crate) const KEYWORD: &'static str = "%%<uninstall";
}

/// **(>)** Requests uninstalling a previously installed message **watcher**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwatch {
    /// Name of the message watcher that should be uninstalled.
    pub name: String,
}

impl Unwatch {
    pub(crate) const KEYWORD: &'static str = "%%>unwatch";
}

/// **(<)** Confirmation that the **watcher**
/// has been uninstalled properly or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwatchAck {
    /// Name of the message watcher asked to uninstall.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl UnwatchAck {
    pub(crate) const KEYWORD: &'static str = "%%<unwatch";
}

/// **(>)** Requests the installing of a message **watcher**
/// (post-dispatching notifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    /// Name of the messages for that a watcher should be installed.
    pub name: String,
}

impl Watch {
    pub(crate) const KEYWORD: &'static str = "%%>watch";
}

/// **(<)** Confirmation that the **watcher**
/// has been installed properly or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchAck {
    /// Name of the messages asked to watch.
    pub name: String,

    /// Success of operation.
    pub success: bool,
}

impl WatchAck {
    pub(crate) const KEYWORD: &'static str = "%%<watch";
}

/// Any single command of the protocol, as one line of traffic.
///
/// Parsing keys off the keyword prefix of the line; the keyword table is
/// fixed at compile time, unknown keywords are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // variants are documented on their inner struct
pub enum Command {
    Connect(Connect),
    ErrorIn(ErrorIn),
    Install(Install),
    InstallAck(InstallAck),
    Message(Message),
    MessageAck(MessageAck),
    Output(Output),
    SetLocal(SetLocal),
    SetLocalAck(SetLocalAck),
    Uninstall(Uninstall),
    UninstallAck(UninstallAck),
    Unwatch(Unwatch),
    UnwatchAck(UnwatchAck),
    Watch(Watch),
    WatchAck(WatchAck),
}

impl Command {
    /// The wire keyword introducing this kind of command.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Connect(_) => Connect::KEYWORD,
            Self::ErrorIn(_) => ErrorIn::KEYWORD,
            Self::Install(_) => Install::KEYWORD,
            Self::InstallAck(_) => InstallAck::KEYWORD,
            Self::Message(_) => Message::KEYWORD,
            Self::MessageAck(_) => MessageAck::KEYWORD,
            Self::Output(_) => Output::KEYWORD,
            Self::SetLocal(_) => SetLocal::KEYWORD,
            Self::SetLocalAck(_) => SetLocalAck::KEYWORD,
            Self::Uninstall(_) => Uninstall::KEYWORD,
            Self::UninstallAck(_) => UninstallAck::KEYWORD,
            Self::Unwatch(_) => Unwatch::KEYWORD,
            Self::UnwatchAck(_) => UnwatchAck::KEYWORD,
            Self::Watch(_) => Watch::KEYWORD,
            Self::WatchAck(_) => WatchAck::KEYWORD,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_string(self))
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        from_str(line)
    }
}

macro_rules! impl_from {
    ($($kind:ident),+ $(,)?) => {
        $(impl From<$kind> for Command {
            fn from(command: $kind) -> Self {
                Self::$kind(command)
            }
        })+
    };
}

impl_from!(
    Connect, ErrorIn, Install, InstallAck, Message, MessageAck, Output, SetLocal, SetLocalAck,
    Uninstall, UninstallAck, Unwatch, UnwatchAck, Watch, WatchAck,
);

//! External command surface
//!
//! Commands are small JSON envelopes, `{"cmd": string, "data": [string]}`,
//! shared by the HTTP endpoint and the native-messaging bridge. The
//! bridge frames them for a browser extension and forwards each one to the
//! endpoint.

mod http;
pub mod nmh;

pub use http::{router, serve};

use crate::storage::Storage;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A command envelope, used for both requests and replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub cmd: String,

    #[serde(default)]
    pub data: Vec<String>,
}

impl Command {
    pub fn new(cmd: impl Into<String>, data: Vec<String>) -> Command {
        Command {
            cmd: cmd.into(),
            data,
        }
    }
}

/// Executes a command against the store.
///
/// `init` resets the client view and answers with the stored class names;
/// anything else echoes a hello.
pub fn dispatch(storage: &Storage, command: &Command) -> Result<Command> {
    match command.cmd.as_str() {
        "init" => Ok(Command::new("classes", storage.classes().names())),
        _ => Ok(Command::new("hello", vec!["world".to_string()])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_returns_class_names() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let reply = dispatch(&storage, &Command::new("init", vec![])).unwrap();
        assert_eq!(reply.cmd, "classes");
        assert_eq!(reply.data, storage.classes().names());
        assert!(!reply.data.is_empty());
    }

    #[test]
    fn test_unknown_command_echoes_hello() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let reply = dispatch(&storage, &Command::new("bogus", vec!["x".into()])).unwrap();
        assert_eq!(reply, Command::new("hello", vec!["world".to_string()]));
    }

    #[test]
    fn test_command_json_shape() {
        let command = Command::new("init", vec![]);
        assert_eq!(
            serde_json::to_string(&command).unwrap(),
            r#"{"cmd":"init","data":[]}"#
        );
        let parsed: Command = serde_json::from_str(r#"{"cmd":"init"}"#).unwrap();
        assert_eq!(parsed.cmd, "init");
        assert!(parsed.data.is_empty());
    }
}

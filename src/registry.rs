//! Static catalog of the commands this server executes.
//!
//! The registry is used twice: the dispatcher validates requests against it,
//! and the discovery request renders it as text for the peer.

/// Describes one command and its named parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    /// `(param_name, type_description)` pairs in declaration order
    pub params: &'static [(&'static str, &'static str)],
}

impl CommandDescriptor {
    /// Whether `param` is declared by this command
    pub fn has_param(&self, param: &str) -> bool {
        self.params.iter().any(|(name, _)| *name == param)
    }
}

pub const CHECK_LOCAL_FILE: &str = "CheckLocalFile";
pub const QUARANTINE_LOCAL_FILE: &str = "QuarantineLocalFile";

/// All commands known to the server
pub const COMMANDS: &[CommandDescriptor] = &[
    CommandDescriptor {
        name: CHECK_LOCAL_FILE,
        description: "Check a local file for malware",
        params: &[
            ("file_path", "string, path to file to check"),
            ("signature", "string, signature bytes of malware in hex format"),
        ],
    },
    CommandDescriptor {
        name: QUARANTINE_LOCAL_FILE,
        description: "Quarantine a local file",
        params: &[("file_path", "string, path to file to quarantine")],
    },
];

/// Template describing the shape of a command request
pub const REQUEST_FORMAT: &str = r#"{
    "command": COMMAND,
    "params": {
        PARAM1: VALUE1,
        PARAM2: VALUE2,
        ...
    }
}
"#;

/// Look up a command by exact name
pub fn lookup<'a>(commands: &'a [CommandDescriptor], name: &str) -> Option<&'a CommandDescriptor> {
    commands.iter().find(|cmd| cmd.name == name)
}

/// Render the registry as the indented text served on discovery.
pub fn render(commands: &[CommandDescriptor]) -> String {
    let mut out = String::new();
    for cmd in commands {
        out.push_str(&format!("\t{}: {}\n", cmd.name, cmd.description));
        out.push_str("\t\tParams:\n");
        for (param, kind) in cmd.params {
            out.push_str(&format!("\t\t\t{param}: {kind}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(COMMANDS, "CheckLocalFile").map(|c| c.params.len()), Some(2));
        assert_eq!(lookup(COMMANDS, "QuarantineLocalFile").map(|c| c.params.len()), Some(1));
        assert!(lookup(COMMANDS, "checklocalfile").is_none());
        assert!(lookup(COMMANDS, "").is_none());
    }

    #[test]
    fn test_has_param() {
        let cmd = lookup(COMMANDS, QUARANTINE_LOCAL_FILE).unwrap();
        assert!(cmd.has_param("file_path"));
        assert!(!cmd.has_param("signature"));
    }

    #[test]
    fn test_render() {
        let text = render(&COMMANDS[1..]);
        assert_eq!(
            text,
            "\tQuarantineLocalFile: Quarantine a local file\n\
             \t\tParams:\n\
             \t\t\tfile_path: string, path to file to quarantine\n"
        );

        let full = render(COMMANDS);
        for cmd in COMMANDS {
            assert!(full.contains(cmd.name));
        }
    }
}

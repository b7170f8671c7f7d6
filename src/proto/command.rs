use std::fmt;

/// One request on the wire. Each is a short verb, optionally followed by a
/// single decimal argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // ---- Diagnostics ----
    Id,

    // ---- Motion ----
    Home,
    Goto(u32),

    // ---- State ----
    Position,
}

impl Command {
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Id => "ID",
            Command::Home => "HOME",
            Command::Goto(_) => "GOTO",
            Command::Position => "POS?",
        }
    }

    /// Wire bytes: the command text and exactly one `\n`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.to_string().into_bytes();
        out.push(b'\n');
        out
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Goto(n) => write!(f, "{} {}", self.verb(), n),
            _ => f.write_str(self.verb()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_single_newline() {
        assert_eq!(Command::Id.encode(), b"ID\n");
        assert_eq!(Command::Home.encode(), b"HOME\n");
        assert_eq!(Command::Position.encode(), b"POS?\n");
        assert_eq!(Command::Goto(3).encode(), b"GOTO 3\n");
    }

    #[test]
    fn display_has_no_terminator() {
        assert_eq!(Command::Goto(12).to_string(), "GOTO 12");
        assert_eq!(Command::Position.to_string(), "POS?");
    }
}

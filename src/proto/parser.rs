// src/proto/parser.rs
use thiserror::Error;

use super::command::Command;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("no digits in {0:?}")]
    NoDigits(String),
    #[error("position {value} outside 1..={slots}")]
    OutOfRange { value: u32, slots: u32 },
    #[error("invalid integer: {0}")]
    BadInt(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// First contiguous run of ASCII digits anywhere in `s`.
pub fn first_digit_run(s: &str) -> Option<&str> {
    let start = s.find(|c: char| c.is_ascii_digit())?;
    let rest = &s[start..];
    let len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..len])
}

/// Parse a `POS?` reply. Text around the first digit run is ignored; the value
/// must land in `1..=slots`.
pub fn parse_position(line: &str, slots: u32) -> Result<u32, ParseError> {
    let digits = first_digit_run(line).ok_or_else(|| ParseError::NoDigits(line.to_string()))?;
    let value = digits
        .parse::<u32>()
        .map_err(|_| ParseError::BadInt(digits.to_string()))?;
    if value == 0 || value > slots {
        return Err(ParseError::OutOfRange { value, slots });
    }
    Ok(value)
}

/// A move succeeded only if the reply starts with `OK`, case-sensitive.
pub fn is_ack(line: &str) -> bool {
    line.starts_with("OK")
}

/// Parse a request line as the device sees it.
pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let s = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    if s.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut tokens = s.split_whitespace();
    let verb = tokens.next().unwrap_or_default();
    match (verb, tokens.next()) {
        ("ID", None) => Ok(Command::Id),
        ("HOME", None) => Ok(Command::Home),
        ("POS?", None) => Ok(Command::Position),
        ("GOTO", Some(arg)) => arg
            .parse::<u32>()
            .map(Command::Goto)
            .map_err(|_| ParseError::BadInt(arg.to_string())),
        _ => Err(ParseError::UnknownCommand(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_from_first_digit_run() {
        assert_eq!(parse_position("pos=3 ok", 5), Ok(3));
        assert_eq!(parse_position("4", 5), Ok(4));
        assert_eq!(parse_position("slot 2, next 5", 5), Ok(2));
        assert_eq!(parse_position("P1", 5), Ok(1));
    }

    #[test]
    fn position_without_digits() {
        assert_eq!(
            parse_position("error", 5),
            Err(ParseError::NoDigits("error".into()))
        );
        assert!(parse_position("", 5).is_err());
    }

    #[test]
    fn position_bounds() {
        assert_eq!(
            parse_position("0", 5),
            Err(ParseError::OutOfRange { value: 0, slots: 5 })
        );
        assert_eq!(
            parse_position("pos=6", 5),
            Err(ParseError::OutOfRange { value: 6, slots: 5 })
        );
        assert_eq!(parse_position("pos=6", 8), Ok(6));
        assert!(matches!(
            parse_position("99999999999999", 5),
            Err(ParseError::BadInt(_))
        ));
    }

    #[test]
    fn ack_is_anchored_and_case_sensitive() {
        assert!(is_ack("OK"));
        assert!(is_ack("OK 2"));
        assert!(!is_ack("ok"));
        assert!(!is_ack(" OK"));
        assert!(!is_ack("ERR bad slot"));
        assert!(!is_ack(""));
    }

    #[test]
    fn parse_requests() {
        assert_eq!(parse_command("ID\n"), Ok(Command::Id));
        assert_eq!(parse_command("HOME"), Ok(Command::Home));
        assert_eq!(parse_command("POS?\r\n"), Ok(Command::Position));
        assert_eq!(parse_command("GOTO 4"), Ok(Command::Goto(4)));
    }

    #[test]
    fn test_error_cases() {
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert!(matches!(
            parse_command("GOTO x"),
            Err(ParseError::BadInt(_))
        ));
        assert!(matches!(
            parse_command("GOTO"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_command("ID 2"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            parse_command("SPIN"),
            Err(ParseError::UnknownCommand(_))
        ));
    }
}

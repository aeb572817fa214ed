//! Line delimiters
//!
//! The delimiter is the only framing state shared between the host and the
//! reader thread. [`DelimiterCell`] guards it with its own lock so that
//! updating it never waits on the write queue.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line delimiter used to split the inbound stream
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    /// LF only (Unix)
    Lf,
    /// CR+LF (Windows)
    #[default]
    CrLf,
    /// CR only (old Mac)
    Cr,
    /// No framing; nothing is ever emitted
    None,
    /// Any other separator
    Custom(String),
}

impl Delimiter {
    /// Presets offered to users
    pub fn presets() -> &'static [Delimiter] {
        static PRESETS: [Delimiter; 4] = [Delimiter::Lf, Delimiter::CrLf, Delimiter::Cr, Delimiter::None];
        &PRESETS
    }

    /// Delimiter bytes, `None` when framing is disabled
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Lf => Some(b"\n"),
            Self::CrLf => Some(b"\r\n"),
            Self::Cr => Some(b"\r"),
            Self::None => None,
            Self::Custom(s) if s.is_empty() => None,
            Self::Custom(s) => Some(s.as_bytes()),
        }
    }

    /// Delimiter text, `None` when framing is disabled
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Lf => Some("\n"),
            Self::CrLf => Some("\r\n"),
            Self::Cr => Some("\r"),
            Self::None => None,
            Self::Custom(s) if s.is_empty() => None,
            Self::Custom(s) => Some(s),
        }
    }

    /// Whether this delimiter splits anything
    pub fn is_framing(&self) -> bool {
        self.as_bytes().is_some()
    }

    /// `text` followed by this delimiter, the way line-oriented hosts send it
    pub fn terminate(&self, text: &str) -> Vec<u8> {
        let mut out = text.as_bytes().to_vec();
        if let Some(delim) = self.as_bytes() {
            out.extend_from_slice(delim);
        }
        out
    }

    /// Get name of delimiter
    pub fn name(&self) -> &str {
        match self {
            Self::Lf => "LF",
            Self::CrLf => "CRLF",
            Self::Cr => "CR",
            Self::None => "None",
            Self::Custom(_) => "Custom",
        }
    }
}

impl From<&str> for Delimiter {
    fn from(s: &str) -> Self {
        match s {
            "\n" => Self::Lf,
            "\r\n" => Self::CrLf,
            "\r" => Self::Cr,
            "" => Self::None,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for Delimiter {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Option<&str>> for Delimiter {
    fn from(s: Option<&str>) -> Self {
        match s {
            Some(s) => Self::from(s),
            None => Self::None,
        }
    }
}

impl std::str::FromStr for Delimiter {
    type Err = std::convert::Infallible;

    /// Parses preset names (`lf`, `crlf`, `cr`, `none`) and escaped text
    /// such as `\r\n` or `;`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "lf" => Self::Lf,
            "crlf" => Self::CrLf,
            "cr" => Self::Cr,
            "none" => Self::None,
            _ => Self::from(unescape(s)),
        })
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(s) => write!(f, "Custom({})", s.escape_default()),
            other => f.write_str(other.name()),
        }
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Shared delimiter slot read by the reader once per scan pass
#[derive(Debug, Default)]
pub struct DelimiterCell {
    inner: Mutex<Delimiter>,
}

impl DelimiterCell {
    /// Create a cell holding `delimiter`
    pub fn new(delimiter: Delimiter) -> Self {
        Self {
            inner: Mutex::new(delimiter),
        }
    }

    /// Replace the delimiter; takes effect on the next scan pass
    pub fn set(&self, delimiter: Delimiter) {
        *self.inner.lock() = delimiter;
    }

    /// Consistent copy of the current delimiter
    pub fn snapshot(&self) -> Delimiter {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_crlf() {
        assert_eq!(Delimiter::default(), Delimiter::CrLf);
        assert_eq!(DelimiterCell::default().snapshot().as_str(), Some("\r\n"));
    }

    #[test]
    fn test_from_str_presets() {
        assert_eq!("\n".parse::<Delimiter>().unwrap(), Delimiter::Lf);
        assert_eq!(Delimiter::from("\r\n"), Delimiter::CrLf);
        assert_eq!(Delimiter::from(""), Delimiter::None);
        assert_eq!(Delimiter::from(None), Delimiter::None);
        assert_eq!(Delimiter::from(";"), Delimiter::Custom(";".into()));
    }

    #[test]
    fn test_parse_names_and_escapes() {
        assert_eq!("CRLF".parse::<Delimiter>().unwrap(), Delimiter::CrLf);
        assert_eq!("none".parse::<Delimiter>().unwrap(), Delimiter::None);
        assert_eq!(r"\r\n".parse::<Delimiter>().unwrap(), Delimiter::CrLf);
        assert_eq!(r"\n\n".parse::<Delimiter>().unwrap(), Delimiter::Custom("\n\n".into()));
    }

    #[test]
    fn test_empty_custom_disables_framing() {
        let empty = Delimiter::Custom(String::new());
        assert!(!empty.is_framing());
        assert!(!Delimiter::None.is_framing());
        assert!(Delimiter::Cr.is_framing());
    }

    #[test]
    fn test_terminate() {
        assert_eq!(Delimiter::CrLf.terminate("AT"), b"AT\r\n");
        assert_eq!(Delimiter::None.terminate("AT"), b"AT");
    }

    #[test]
    fn test_cell_set_and_snapshot() {
        let cell = DelimiterCell::new(Delimiter::Lf);
        let before = cell.snapshot();
        cell.set(Delimiter::Cr);
        assert_eq!(before, Delimiter::Lf);
        assert_eq!(cell.snapshot(), Delimiter::Cr);
    }
}

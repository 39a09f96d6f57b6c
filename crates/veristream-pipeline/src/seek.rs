use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Seek behavior flags, combined with `+` in scenario files:
/// `flags=accurate+flush`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeekFlags(u32);

impl SeekFlags {
    pub const NONE: SeekFlags = SeekFlags(0);
    pub const FLUSH: SeekFlags = SeekFlags(1 << 0);
    pub const ACCURATE: SeekFlags = SeekFlags(1 << 1);
    pub const KEY_UNIT: SeekFlags = SeekFlags(1 << 2);
    pub const SEGMENT: SeekFlags = SeekFlags(1 << 3);
    pub const SNAP_BEFORE: SeekFlags = SeekFlags(1 << 4);
    pub const SNAP_AFTER: SeekFlags = SeekFlags(1 << 5);
    pub const INSTANT_RATE_CHANGE: SeekFlags = SeekFlags(1 << 6);

    const NAMES: &'static [(&'static str, SeekFlags)] = &[
        ("flush", SeekFlags::FLUSH),
        ("accurate", SeekFlags::ACCURATE),
        ("key-unit", SeekFlags::KEY_UNIT),
        ("segment", SeekFlags::SEGMENT),
        ("snap-before", SeekFlags::SNAP_BEFORE),
        ("snap-after", SeekFlags::SNAP_AFTER),
        ("instant-rate-change", SeekFlags::INSTANT_RATE_CHANGE),
    ];

    pub fn contains(self, other: SeekFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a `+`-separated flag set: `accurate+flush`.
    pub fn from_names(s: &str) -> Result<SeekFlags, String> {
        let mut flags = SeekFlags::NONE;
        for name in s.split('+').map(str::trim).filter(|n| !n.is_empty()) {
            let Some((_, flag)) = Self::NAMES.iter().find(|(n, _)| *n == name) else {
                return Err(format!("unknown seek flag `{name}`"));
            };
            flags |= *flag;
        }
        Ok(flags)
    }
}

impl std::ops::BitOr for SeekFlags {
    type Output = SeekFlags;

    fn bitor(self, rhs: SeekFlags) -> SeekFlags {
        SeekFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for SeekFlags {
    fn bitor_assign(&mut self, rhs: SeekFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SeekFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, flag) in Self::NAMES {
            if self.contains(*flag) {
                if !first {
                    write!(f, "+")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// How a seek endpoint is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeekType {
    /// Endpoint untouched.
    #[default]
    None,
    /// Absolute position.
    Set,
    /// Relative to the end of the stream.
    End,
}

impl FromStr for SeekType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SeekType::None),
            "set" => Ok(SeekType::Set),
            "end" => Ok(SeekType::End),
            other => Err(format!("unknown seek type `{other}`")),
        }
    }
}

/// A fully resolved seek request.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeekSpec {
    pub rate: f64,
    pub start_type: SeekType,
    pub start: Option<Duration>,
    pub stop_type: SeekType,
    pub stop: Option<Duration>,
    pub flags: SeekFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_names_parse_and_print() {
        let flags = SeekFlags::from_names("accurate+flush").unwrap();
        assert!(flags.contains(SeekFlags::ACCURATE));
        assert!(flags.contains(SeekFlags::FLUSH));
        assert!(!flags.contains(SeekFlags::KEY_UNIT));
        assert_eq!(flags.to_string(), "flush+accurate");
    }

    #[test]
    fn unknown_flag_is_rejected() {
        assert!(SeekFlags::from_names("accurate+warp").is_err());
    }

    #[test]
    fn empty_set_prints_none() {
        assert_eq!(SeekFlags::NONE.to_string(), "none");
        assert!(SeekFlags::from_names("").unwrap().is_empty());
    }
}

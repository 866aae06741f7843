use crate::replica::config::MAJORITY_WRITE_MODE;
use crate::types::{Document, FieldError, Value};
use std::time::Duration;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SyncMode {
    Unset,
    None,
    Journal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteMode {
    /// `w: <n>`
    Nodes(usize),
    Majority,
    /// A custom mode from the config's `getLastErrorModes`.
    Tagged(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteConcernOptions {
    pub w: WriteMode,
    pub sync_mode: SyncMode,
    /// None waits forever.
    pub w_timeout: Option<Duration>,
}

impl WriteConcernOptions {
    pub fn nodes(n: usize) -> Self {
        WriteConcernOptions {
            w: WriteMode::Nodes(n),
            sync_mode: SyncMode::None,
            w_timeout: None,
        }
    }

    pub fn majority() -> Self {
        WriteConcernOptions {
            w: WriteMode::Majority,
            sync_mode: SyncMode::Unset,
            w_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.w_timeout = Some(timeout);
        self
    }

    pub fn journaled(mut self, j: bool) -> Self {
        self.sync_mode = if j { SyncMode::Journal } else { SyncMode::None };
        self
    }

    /// Parses `{w, j, wtimeout}`. A missing `w` means 1.
    pub fn parse(doc: &Document) -> Result<Self, FieldError> {
        let w = match doc.get("w") {
            None => WriteMode::Nodes(1),
            Some(Value::String(mode)) if mode == MAJORITY_WRITE_MODE => WriteMode::Majority,
            Some(Value::String(mode)) => WriteMode::Tagged(mode.clone()),
            Some(other) => match other.as_i64() {
                Some(n) if n >= 0 => WriteMode::Nodes(n as usize),
                _ => {
                    return Err(FieldError::TypeMismatch {
                        field: "w".into(),
                        expected: "non-negative number or string",
                        found: other.type_name(),
                    })
                }
            },
        };
        let sync_mode = match doc.get_bool("j") {
            Some(true) => SyncMode::Journal,
            Some(false) => SyncMode::None,
            None => SyncMode::Unset,
        };
        let w_timeout = match doc.get_i64("wtimeout") {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            _ => None,
        };

        Ok(WriteConcernOptions { w, sync_mode, w_timeout })
    }

    /// Resolves an unset sync mode. Majority writes follow the set's journal default; everything
    /// else defaults to not waiting for the journal.
    pub fn resolved(mut self, majority_journal_default: bool) -> Self {
        if self.sync_mode == SyncMode::Unset {
            self.sync_mode = match self.w {
                WriteMode::Majority if majority_journal_default => SyncMode::Journal,
                _ => SyncMode::None,
            };
        }
        self
    }

    pub fn is_journaled(&self) -> bool {
        self.sync_mode == SyncMode::Journal
    }
}

impl Default for WriteConcernOptions {
    fn default() -> Self {
        WriteConcernOptions::nodes(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_forms() {
        let majority = WriteConcernOptions::parse(&Document::new().with("w", "majority")).unwrap();
        assert_eq!(majority.w, WriteMode::Majority);
        assert_eq!(majority.sync_mode, SyncMode::Unset);

        let numbered = WriteConcernOptions::parse(
            &Document::new().with("w", 2).with("j", false).with("wtimeout", 50),
        )
        .unwrap();
        assert_eq!(numbered.w, WriteMode::Nodes(2));
        assert_eq!(numbered.sync_mode, SyncMode::None);
        assert_eq!(numbered.w_timeout, Some(Duration::from_millis(50)));

        let tagged = WriteConcernOptions::parse(&Document::new().with("w", "multiDC")).unwrap();
        assert_eq!(tagged.w, WriteMode::Tagged("multiDC".into()));

        assert!(WriteConcernOptions::parse(&Document::new().with("w", true)).is_err());
    }

    #[test]
    fn majority_sync_mode_follows_journal_default() {
        assert!(WriteConcernOptions::majority().resolved(true).is_journaled());
        assert!(!WriteConcernOptions::majority().resolved(false).is_journaled());
        assert!(!WriteConcernOptions::parse(&Document::new().with("w", 3))
            .unwrap()
            .resolved(true)
            .is_journaled());
        // An explicit j wins over the default.
        assert!(!WriteConcernOptions::majority().journaled(false).resolved(true).is_journaled());
    }
}

use std::fmt;

/// RecordId is the key of a record inside a record store. Live records always have a strictly
/// positive id.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(i64);

impl RecordId {
    pub fn new(repr: i64) -> Self {
        RecordId(repr)
    }

    pub fn null() -> Self {
        RecordId(0)
    }

    pub fn max() -> Self {
        RecordId(i64::MAX)
    }

    pub fn repr(&self) -> i64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// A normal id is one that can identify a live record.
    pub fn is_normal(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

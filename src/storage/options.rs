use std::convert::TryFrom;

#[derive(Clone, Debug, Default)]
pub struct RecordStoreOptions {
    pub capped: bool,
    pub capped_max_size: Option<i64>,
    pub capped_max_docs: Option<i64>,
    pub is_oplog: bool,
    /// Overrides the computed stone size. Intended for tests.
    pub min_bytes_per_stone: Option<i64>,
    /// Overrides the computed number of stones to keep. Intended for tests.
    pub num_stones_to_keep: Option<usize>,
}

impl RecordStoreOptions {
    pub fn oplog(max_size: i64) -> Self {
        RecordStoreOptions {
            capped: true,
            capped_max_size: Some(max_size),
            is_oplog: true,
            ..Default::default()
        }
    }

    pub fn capped(max_size: i64, max_docs: Option<i64>) -> Self {
        RecordStoreOptions {
            capped: true,
            capped_max_size: Some(max_size),
            capped_max_docs: max_docs,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct RecordStoreOptionsValidated {
    pub capped: bool,
    pub capped_max_size: i64,
    /// -1 when the collection has no document limit.
    pub capped_max_docs: i64,
    pub is_oplog: bool,
    pub min_bytes_per_stone: Option<i64>,
    pub num_stones_to_keep: Option<usize>,
}

impl RecordStoreOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.is_oplog && !self.capped {
            return Err("The oplog must be a capped record store");
        }
        if self.capped && self.capped_max_size <= 0 {
            return Err("Capped record stores require a positive maximum size");
        }
        if self.capped_max_docs == 0 || self.capped_max_docs < -1 {
            return Err("Capped maximum document count must be positive");
        }
        if !self.capped && self.capped_max_docs != -1 {
            return Err("Only capped record stores can limit their document count");
        }
        if let Some(min_bytes) = self.min_bytes_per_stone {
            if min_bytes <= 0 {
                return Err("Minimum bytes per stone must be positive");
            }
        }
        if let Some(0) = self.num_stones_to_keep {
            return Err("Number of stones to keep must be positive");
        }

        Ok(())
    }
}

impl TryFrom<RecordStoreOptions> for RecordStoreOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RecordStoreOptions) -> Result<Self, Self::Error> {
        let values = RecordStoreOptionsValidated {
            capped: options.capped,
            capped_max_size: options.capped_max_size.unwrap_or(0),
            capped_max_docs: options.capped_max_docs.unwrap_or(-1),
            is_oplog: options.is_oplog,
            min_bytes_per_stone: options.min_bytes_per_stone,
            num_stones_to_keep: options.num_stones_to_keep,
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(expected: Result<(), &'static str>, options: RecordStoreOptions) {
        let result = RecordStoreOptionsValidated::try_from(options).map(|_| ());
        assert_eq!(result, expected);
    }

    #[test]
    fn validation() {
        run(Ok(()), RecordStoreOptions::default());
        run(Ok(()), RecordStoreOptions::oplog(1024));
        run(Ok(()), RecordStoreOptions::capped(1024, Some(10)));
        run(
            Err("The oplog must be a capped record store"),
            RecordStoreOptions {
                is_oplog: true,
                ..Default::default()
            },
        );
        run(
            Err("Capped record stores require a positive maximum size"),
            RecordStoreOptions::capped(0, None),
        );
        run(
            Err("Capped maximum document count must be positive"),
            RecordStoreOptions::capped(10, Some(0)),
        );
        run(
            Err("Only capped record stores can limit their document count"),
            RecordStoreOptions {
                capped_max_docs: Some(3),
                ..Default::default()
            },
        );
    }
}

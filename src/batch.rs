//! Size-bounded batches of sentences
//!
//! A batch is the body of one datapoint push: every line followed by one
//! terminator byte, never more than `capacity` bytes in total.

use crate::{
    Result,
    error::GpsPushError,
    framer::{Line, TERMINATOR},
};

/// Default batch capacity in bytes
pub const DEFAULT_BATCH_CAPACITY: usize = 8192;

#[derive(Debug, Clone)]
pub struct Batch {
    buf: Vec<u8>,
    capacity: usize,
    count: usize,
}

impl Batch {
    /// Empty batch of [`DEFAULT_BATCH_CAPACITY`] bytes
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BATCH_CAPACITY)
    }

    /// Empty batch holding at most `capacity` bytes, terminators included
    ///
    /// # Arguments
    /// * `capacity` - Upper bound on [`length`](Self::length)
    pub fn with_capacity(capacity: usize) -> Self {
        Batch {
            buf: Vec::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    /// Appends a line and its terminator
    ///
    /// Returns the new line count. If the line does not fit, the batch is left
    /// untouched and [`GpsPushError::BatchOverflow`] is returned.
    pub fn append(&mut self, line: &Line<'_>) -> Result<usize> {
        let needed = line.len() + 1;
        let available = self.capacity - self.buf.len();
        if needed > available {
            return Err(GpsPushError::BatchOverflow { needed, available });
        }

        self.buf.extend_from_slice(line.as_bytes());
        self.buf.push(TERMINATOR);
        self.count += 1;

        Ok(self.count)
    }

    /// Empties the batch, keeping its allocation
    pub fn reset(&mut self) {
        self.buf.clear();
        self.count = 0;
    }

    /// Serialized size in bytes
    pub fn length(&self) -> usize {
        self.buf.len()
    }

    /// Number of lines appended since the last reset
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Lines in append order, without terminators
    pub fn lines(&self) -> impl Iterator<Item = Line<'_>> {
        self.buf
            .split(|&b| b == TERMINATOR)
            .take(self.count)
            .map(Line::new)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_append_and_reset() {
        let mut batch = Batch::new();
        assert_eq!(batch.append(&Line::new(b"$GPGGA,1")).unwrap(), 1);
        assert_eq!(batch.append(&Line::new(b"$GPRMC,2")).unwrap(), 2);
        assert_eq!(batch.as_bytes(), b"$GPGGA,1\n$GPRMC,2\n");
        assert_eq!(batch.length(), 18);

        let lines: Vec<_> = batch.lines().map(|l| l.to_string()).collect();
        assert_eq!(lines, vec!["$GPGGA,1", "$GPRMC,2"]);

        batch.reset();
        assert!(batch.is_empty());
        assert_eq!(batch.length(), 0);
        assert!(batch.as_bytes().is_empty());
    }

    #[test]
    fn test_overflow_leaves_batch_untouched() {
        let mut batch = Batch::with_capacity(10);
        batch.append(&Line::new(b"$GPGSA")).unwrap();

        let err = batch.append(&Line::new(b"$GP")).unwrap_err();
        assert!(matches!(
            err,
            GpsPushError::BatchOverflow {
                needed: 4,
                available: 3
            }
        ));
        assert_eq!(batch.count(), 1);
        assert_eq!(batch.length(), 7);
        assert_eq!(batch.as_bytes(), b"$GPGSA\n");
    }

    #[test]
    fn test_exact_fit_is_accepted() {
        let mut batch = Batch::with_capacity(7);
        assert_eq!(batch.append(&Line::new(b"$GPGSA")).unwrap(), 1);
        assert_eq!(batch.length(), batch.capacity());
    }

    proptest! {
        #[test]
        fn prop_length_is_sum_of_lines_plus_terminators(
            lines in prop::collection::vec("[$A-Z0-9,]{1,80}", 0..200),
        ) {
            let mut batch = Batch::new();
            let mut accepted = 0usize;
            let mut bytes = 0usize;

            for line in &lines {
                let before = (batch.count(), batch.length());
                match batch.append(&Line::new(line.as_bytes())) {
                    Ok(count) => {
                        accepted += 1;
                        bytes += line.len() + 1;
                        prop_assert_eq!(count, accepted);
                    }
                    Err(_) => prop_assert_eq!((batch.count(), batch.length()), before),
                }
            }

            prop_assert_eq!(batch.length(), bytes);
            prop_assert!(batch.length() <= batch.capacity());
        }
    }
}

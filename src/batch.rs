//! Batching: groups the row sequence into fixed-size, ordered batches.

use crate::error::LoaderResult;
use crate::types::Row;

/// A contiguous, ordered slice of rows written as one atomic unit.
///
/// Batch indices start at 0 and are contiguous and strictly increasing; the
/// row at data position `i` always lands in batch `(i - 1) / batch_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    index: u64,
    rows: Vec<Row>,
}

impl Batch {
    /// 0-based batch index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Rows in source order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Iterator adapter that groups rows into batches of `batch_size`.
///
/// The final batch may be shorter. A row-level error is passed through and
/// ends the iteration; rows already collected for the failing batch are
/// dropped with it, never reordered into a later batch.
pub struct Batches<I> {
    rows: I,
    batch_size: usize,
    next_index: u64,
    done: bool,
}

impl<I> Batches<I> {
    /// Create a batching adapter over a row iterator.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size == 0`.
    pub fn new(rows: I, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        Self {
            rows,
            batch_size,
            next_index: 0,
            done: false,
        }
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = LoaderResult<Row>>,
{
    type Item = LoaderResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut rows = Vec::with_capacity(self.batch_size);
        while rows.len() < self.batch_size {
            match self.rows.next() {
                Some(Ok(row)) => rows.push(row),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => break,
            }
        }

        if rows.is_empty() {
            self.done = true;
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;
        Some(Ok(Batch { index, rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoaderError;
    use crate::types::Field;

    fn rows_of(n: u64) -> impl Iterator<Item = LoaderResult<Row>> {
        (1..=n).map(|i| Ok(Row::new(i, vec![Field::new(i.to_string())])))
    }

    #[test]
    fn batch_count_is_ceil_of_rows_over_size() {
        let batches: Vec<Batch> = Batches::new(rows_of(5), 2).map(Result::unwrap).collect();
        assert_eq!(batches.len(), 3);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(sizes.iter().sum::<usize>(), 5);
    }

    #[test]
    fn indices_are_contiguous_and_rows_stay_ordered() {
        let batches: Vec<Batch> = Batches::new(rows_of(10), 3).map(Result::unwrap).collect();
        let indices: Vec<u64> = batches.iter().map(Batch::index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);

        for batch in &batches {
            for row in batch.rows() {
                assert_eq!(batch.index(), (row.position() - 1) / 3);
            }
        }
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_batch() {
        let batches: Vec<Batch> = Batches::new(rows_of(6), 3).map(Result::unwrap).collect();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn row_error_ends_iteration() {
        let rows = vec![
            Ok(Row::new(1, vec![Field::new("1")])),
            Err(LoaderError::Parse {
                line: 3,
                message: "bad".to_string(),
            }),
            Ok(Row::new(3, vec![Field::new("3")])),
        ];
        let mut batches = Batches::new(rows.into_iter(), 10);
        assert!(batches.next().unwrap().is_err());
        assert!(batches.next().is_none());
    }
}

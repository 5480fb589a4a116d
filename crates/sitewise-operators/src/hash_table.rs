//! Hash index: composite-key hash -> rows sharing that key.
//!
//! Keys are hashed with `hash_scalars`; two distinct key tuples that collide
//! are served as one group.

use std::collections::HashMap;

use sitewise_core::codec::{read_table, write_table, ByteReader, ByteWriter};
use sitewise_core::hash::hash_scalars;
use sitewise_core::types::{RowBatch, Scalar};

use crate::compute::ComputeExpr;
use crate::traits::{OpError, Result, WireFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct HashTableImpl {
    groups: HashMap<u64, RowBatch>,
    /// Zero-row table with the indexed table's schema, returned on a miss.
    empty: RowBatch,
}

impl HashTableImpl {
    /// Index `table` by the values of `keys`, evaluated per row.
    pub fn build(table: &RowBatch, keys: &[ComputeExpr]) -> Result<Self> {
        let key_cols = keys
            .iter()
            .map(|k| k.eval(table))
            .collect::<Result<Vec<_>>>()?;
        let mut rows_by_key: HashMap<u64, Vec<usize>> = HashMap::new();
        for row in 0..table.num_rows() {
            let h = hash_scalars(key_cols.iter().map(|c| &c[row]));
            rows_by_key.entry(h).or_default().push(row);
        }
        let mut groups = HashMap::with_capacity(rows_by_key.len());
        for (h, rows) in rows_by_key {
            groups.insert(h, table.select_rows(&rows)?);
        }
        Ok(Self {
            groups,
            empty: RowBatch::empty(&table.schema()),
        })
    }

    pub fn query(&self, key: &[Scalar]) -> &RowBatch {
        self.groups.get(&hash_scalars(key)).unwrap_or(&self.empty)
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }
}

impl WireFormat for HashTableImpl {
    fn write_to(&self, w: &mut ByteWriter) {
        let mut keys: Vec<&u64> = self.groups.keys().collect();
        keys.sort();
        w.put_u64(keys.len() as u64);
        for k in keys {
            w.put_u64(*k);
            write_table(w, &self.groups[k]);
        }
        write_table(w, &self.empty);
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let n = r.get_u64()?;
        // Each entry carries at least an 8-byte key.
        if n > (r.remaining() / 8) as u64 {
            return Err(OpError::Codec(format!("hash table claims {n} entries")));
        }
        let mut groups = HashMap::with_capacity(n as usize);
        for _ in 0..n {
            let k = r.get_u64()?;
            groups.insert(k, read_table(r)?);
        }
        let empty = read_table(r)?;
        Ok(Self { groups, empty })
    }

    fn size_bytes(&self) -> usize {
        self.groups
            .values()
            .map(|t| std::mem::size_of::<u64>() + t.size_bytes())
            .sum()
    }
}

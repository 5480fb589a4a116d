//! Payloads exchanged between operators and across sites.

use sitewise_core::codec::{read_table, write_table, ByteReader, ByteWriter};
use sitewise_core::types::RowBatch;

use crate::hash_table::HashTableImpl;
use crate::prefix_sum::PrefixSumImpl;
use crate::prefix_sum_2d::PrefixSum2DImpl;
use crate::rtree::RTreeImpl;
use crate::traits::{OpError, Result, WireFormat};

/// A plain materialized table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableData {
    pub table: RowBatch,
}

impl TableData {
    pub fn new(table: RowBatch) -> Self {
        Self { table }
    }
}

impl WireFormat for TableData {
    fn write_to(&self, w: &mut ByteWriter) {
        write_table(w, &self.table);
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self::new(read_table(r)?))
    }

    fn size_bytes(&self) -> usize {
        self.table.size_bytes()
    }
}

/// Which variant a byte payload holds. The bytes themselves are untagged; the
/// receiver knows the kind from the plan structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialKind {
    Table,
    HashTable,
    RTree,
    PrefixSum,
    PrefixSum2D,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SerialData {
    Table(TableData),
    HashTable(HashTableImpl),
    RTree(RTreeImpl),
    PrefixSum(PrefixSumImpl),
    PrefixSum2D(PrefixSum2DImpl),
}

impl SerialData {
    pub fn table(table: RowBatch) -> Self {
        SerialData::Table(TableData::new(table))
    }

    pub fn kind(&self) -> SerialKind {
        match self {
            SerialData::Table(_) => SerialKind::Table,
            SerialData::HashTable(_) => SerialKind::HashTable,
            SerialData::RTree(_) => SerialKind::RTree,
            SerialData::PrefixSum(_) => SerialKind::PrefixSum,
            SerialData::PrefixSum2D(_) => SerialKind::PrefixSum2D,
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            SerialData::Table(d) => d.size_bytes(),
            SerialData::HashTable(d) => d.size_bytes(),
            SerialData::RTree(d) => d.size_bytes(),
            SerialData::PrefixSum(d) => d.size_bytes(),
            SerialData::PrefixSum2D(d) => d.size_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            SerialData::Table(d) => d.to_bytes(),
            SerialData::HashTable(d) => d.to_bytes(),
            SerialData::RTree(d) => d.to_bytes(),
            SerialData::PrefixSum(d) => d.to_bytes(),
            SerialData::PrefixSum2D(d) => d.to_bytes(),
        }
    }

    pub fn from_bytes(kind: SerialKind, bytes: &[u8]) -> Result<Self> {
        Ok(match kind {
            SerialKind::Table => SerialData::Table(TableData::from_bytes(bytes)?),
            SerialKind::HashTable => SerialData::HashTable(HashTableImpl::from_bytes(bytes)?),
            SerialKind::RTree => SerialData::RTree(RTreeImpl::from_bytes(bytes)?),
            SerialKind::PrefixSum => SerialData::PrefixSum(PrefixSumImpl::from_bytes(bytes)?),
            SerialKind::PrefixSum2D => {
                SerialData::PrefixSum2D(PrefixSum2DImpl::from_bytes(bytes)?)
            }
        })
    }

    pub fn into_table(self) -> Result<RowBatch> {
        match self {
            SerialData::Table(d) => Ok(d.table),
            other => Err(other.wrong_variant(SerialKind::Table)),
        }
    }

    pub fn as_table(&self) -> Result<&RowBatch> {
        match self {
            SerialData::Table(d) => Ok(&d.table),
            other => Err(other.wrong_variant(SerialKind::Table)),
        }
    }

    pub fn as_hash_table(&self) -> Result<&HashTableImpl> {
        match self {
            SerialData::HashTable(d) => Ok(d),
            other => Err(other.wrong_variant(SerialKind::HashTable)),
        }
    }

    pub fn as_rtree(&self) -> Result<&RTreeImpl> {
        match self {
            SerialData::RTree(d) => Ok(d),
            other => Err(other.wrong_variant(SerialKind::RTree)),
        }
    }

    pub fn as_prefix_sum(&self) -> Result<&PrefixSumImpl> {
        match self {
            SerialData::PrefixSum(d) => Ok(d),
            other => Err(other.wrong_variant(SerialKind::PrefixSum)),
        }
    }

    pub fn as_prefix_sum_2d(&self) -> Result<&PrefixSum2DImpl> {
        match self {
            SerialData::PrefixSum2D(d) => Ok(d),
            other => Err(other.wrong_variant(SerialKind::PrefixSum2D)),
        }
    }

    fn wrong_variant(&self, wanted: SerialKind) -> OpError {
        OpError::Exec(format!("expected {wanted:?} data, got {:?}", self.kind()))
    }
}

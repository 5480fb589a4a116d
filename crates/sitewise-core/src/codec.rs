//! Little-endian byte codec for tables and the index payloads built on them.
//!
//! Table layout:
//! [ ncols: u32 ][ nrows: u64 ]
//! per column: [ name_len: u64 ][ name ][ type tag: u8 ]
//! per column, per row: [ value tag: u8 ][ payload ]
//!
//! Value tags: 0 null, 1 bool (u8), 2 i64, 3 f64, 4 utf8 (u64 len + bytes).

use crate::error::{Error, Result};
use crate::schema::DataType;
use crate::types::{Column, RowBatch, Scalar};

#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed (u64) byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u64(v.len() as u64);
        self.buf.extend_from_slice(v);
    }

    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Codec(format!(
                "truncated input: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }
    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }
    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Read a u64 length and check it against what is left in the buffer.
    pub fn get_len(&mut self) -> Result<usize> {
        let n = self.get_u64()?;
        let n = usize::try_from(n).map_err(|_| Error::Codec(format!("length {n} overflows")))?;
        if n > self.remaining() {
            return Err(Error::Codec(format!(
                "length {n} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(n)
    }

    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let n = self.get_len()?;
        self.take(n)
    }

    pub fn get_string(&mut self) -> Result<String> {
        let raw = self.get_bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|e| Error::Codec(format!("utf8: {e}")))
    }
}

pub fn write_scalar(w: &mut ByteWriter, v: &Scalar) {
    match v {
        Scalar::Null => w.put_u8(0),
        Scalar::Bool(b) => {
            w.put_u8(1);
            w.put_u8(*b as u8);
        }
        Scalar::I64(i) => {
            w.put_u8(2);
            w.put_i64(*i);
        }
        Scalar::F64(f) => {
            w.put_u8(3);
            w.put_f64(*f);
        }
        Scalar::Str(s) => {
            w.put_u8(4);
            w.put_str(s);
        }
    }
}

pub fn read_scalar(r: &mut ByteReader<'_>) -> Result<Scalar> {
    match r.get_u8()? {
        0 => Ok(Scalar::Null),
        1 => Ok(Scalar::Bool(r.get_u8()? != 0)),
        2 => Ok(Scalar::I64(r.get_i64()?)),
        3 => Ok(Scalar::F64(r.get_f64()?)),
        4 => Ok(Scalar::Str(r.get_string()?)),
        tag => Err(Error::Codec(format!("unknown value tag {tag}"))),
    }
}

pub fn write_table(w: &mut ByteWriter, batch: &RowBatch) {
    w.put_u32(batch.num_columns() as u32);
    w.put_u64(batch.num_rows() as u64);
    for c in &batch.columns {
        w.put_str(&c.name);
        w.put_u8(c.data_type.tag());
    }
    for c in &batch.columns {
        for v in &c.values {
            write_scalar(w, v);
        }
    }
}

pub fn read_table(r: &mut ByteReader<'_>) -> Result<RowBatch> {
    let ncols = r.get_u32()? as usize;
    let nrows = r.get_u64()?;
    let nrows = usize::try_from(nrows).map_err(|_| Error::Codec("row count overflows".into()))?;
    // Each value takes at least one byte.
    if ncols.saturating_mul(nrows) > r.remaining() {
        return Err(Error::Codec(format!(
            "{ncols}x{nrows} table cannot fit in {} bytes",
            r.remaining()
        )));
    }
    let mut headers = Vec::with_capacity(ncols.min(r.remaining()));
    for _ in 0..ncols {
        let name = r.get_string()?;
        let dt = DataType::from_tag(r.get_u8()?)?;
        headers.push((name, dt));
    }
    let mut columns = Vec::with_capacity(headers.len());
    for (name, dt) in headers {
        let mut values = Vec::with_capacity(nrows);
        for _ in 0..nrows {
            values.push(read_scalar(r)?);
        }
        columns.push(Column::new(name, dt, values));
    }
    RowBatch::new(columns)
}

pub fn table_to_bytes(batch: &RowBatch) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(batch.size_bytes());
    write_table(&mut w, batch);
    w.into_bytes()
}

pub fn table_from_bytes(bytes: &[u8]) -> Result<RowBatch> {
    let mut r = ByteReader::new(bytes);
    read_table(&mut r)
}

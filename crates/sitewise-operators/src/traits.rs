//! Error type and the byte-codec trait shared by every payload.

use sitewise_core::codec::{ByteReader, ByteWriter};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OpError>;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("binding error: {0}")]
    Binding(String),

    #[error("type error: {0}")]
    Type(String),

    /// A well-formed request the engine deliberately does not serve.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<sitewise_core::Error> for OpError {
    fn from(e: sitewise_core::Error) -> Self {
        use sitewise_core::Error as E;
        match e {
            E::Binding(m) => OpError::Binding(m),
            E::Type(m) => OpError::Type(m),
            E::Schema(m) => OpError::Schema(m),
            E::Codec(m) => OpError::Codec(m),
            E::Config(m) | E::Invariant(m) => OpError::Exec(m),
        }
    }
}

/// Payloads that travel between execution sites.
///
/// Invariants:
/// - `read_from(write_to(x))` reproduces `x` exactly.
/// - `size_bytes` is a rough in-memory footprint, used for metrics only.
pub trait WireFormat: Sized {
    fn write_to(&self, w: &mut ByteWriter);

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self>;

    fn size_bytes(&self) -> usize;

    fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.write_to(&mut w);
        w.into_bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let out = Self::read_from(&mut r)?;
        if !r.is_exhausted() {
            return Err(OpError::Codec(format!(
                "{} trailing bytes after payload",
                r.remaining()
            )));
        }
        Ok(out)
    }
}

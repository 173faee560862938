use std::io::{Read, Write};

/// Errors raised while decoding stored values
#[derive(Debug, thiserror::Error)]
pub enum TxmProtocolError {
    /// IO error from reader
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// A value could not be deserialized from its stored representation
    #[error("Failed to deserialize stored value: {0}")]
    Deserialization(String),
}

/// Simple trait for types with a canonical encoding
pub trait Encode {
    /// Write the canonical encoding to the writer
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write;

    /// Serialize to a vec
    fn to_vec(&self) -> Vec<u8> {
        let mut buf = vec![];
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }
}

/// Simple trait for types with a canonical encoding
pub trait Decode {
    /// Try to read from some source
    fn read_from<R>(reader: &mut R) -> Result<Self, TxmProtocolError>
    where
        R: Read,
        Self: Sized;
}

impl Encode for u64 {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(&self.to_be_bytes())?;
        Ok(8)
    }
}

impl Decode for u64 {
    fn read_from<R>(reader: &mut R) -> Result<Self, TxmProtocolError>
    where
        R: Read,
        Self: Sized,
    {
        let mut buf = [0; 8];
        reader.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

impl Encode for bool {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: Write,
    {
        writer.write_all(&[u8::from(*self)])?;
        Ok(1)
    }
}

impl Decode for bool {
    fn read_from<R>(reader: &mut R) -> Result<Self, TxmProtocolError>
    where
        R: Read,
        Self: Sized,
    {
        let mut buf = [0; 1];
        reader.read_exact(&mut buf)?;
        match buf[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(TxmProtocolError::Deserialization(format!(
                "invalid bool byte {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u64_encoding_sorts_like_the_number() {
        let small = 255u64.to_vec();
        let large = 256u64.to_vec();
        assert!(small < large);
        assert_eq!(u64::read_from(&mut large.as_slice()).unwrap(), 256);
    }

    #[test]
    fn bool_rejects_garbage() {
        assert!(bool::read_from(&mut [2u8].as_slice()).is_err());
        assert!(bool::read_from(&mut true.to_vec().as_slice()).unwrap());
    }
}

//! Save-state field codec.
//!
//! Components serialize themselves field by field in a fixed order;
//! little-endian scalars, no framing. The order plus the range checks
//! applied on load are the format contract. A failed check surfaces as
//! [`StateError::Corrupt`] and the machine is expected to fall back to
//! its power-on state.

use std::io::{Read, Write};

/// Errors from saving or restoring machine state.
#[derive(Debug)]
pub enum StateError {
    /// Underlying I/O error (short file, broken pipe, ...).
    Io(std::io::Error),

    /// The stream decoded, but a field failed validation (wrong magic,
    /// out-of-range value, mismatched configuration).
    Corrupt,
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "state I/O error: {e}"),
            Self::Corrupt => write!(f, "state integrity check failed"),
        }
    }
}

impl std::error::Error for StateError {}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Validate a loaded field; `Err(Corrupt)` when the condition fails.
pub fn check(cond: bool) -> Result<(), StateError> {
    if cond { Ok(()) } else { Err(StateError::Corrupt) }
}

pub struct StateWriter<'a> {
    w: &'a mut dyn Write,
}

impl<'a> StateWriter<'a> {
    pub fn new(w: &'a mut dyn Write) -> Self {
        Self { w }
    }

    pub fn put_bytes(&mut self, v: &[u8]) -> Result<(), StateError> {
        self.w.write_all(v)?;
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), StateError> {
        self.put_bytes(&[v])
    }

    pub fn put_bool(&mut self, v: bool) -> Result<(), StateError> {
        self.put_u8(v as u8)
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_i32(&mut self, v: i32) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_i64(&mut self, v: i64) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), StateError> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u16s(&mut self, v: &[u16]) -> Result<(), StateError> {
        for &x in v {
            self.put_u16(x)?;
        }
        Ok(())
    }
}

pub struct StateReader<'a> {
    r: &'a mut dyn Read,
}

impl<'a> StateReader<'a> {
    pub fn new(r: &'a mut dyn Read) -> Self {
        Self { r }
    }

    pub fn get_bytes(&mut self, out: &mut [u8]) -> Result<(), StateError> {
        self.r.read_exact(out)?;
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, StateError> {
        let mut b = [0u8; 1];
        self.get_bytes(&mut b)?;
        Ok(b[0])
    }

    pub fn get_bool(&mut self) -> Result<bool, StateError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(StateError::Corrupt),
        }
    }

    pub fn get_u16(&mut self) -> Result<u16, StateError> {
        let mut b = [0u8; 2];
        self.get_bytes(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn get_u32(&mut self) -> Result<u32, StateError> {
        let mut b = [0u8; 4];
        self.get_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn get_i32(&mut self) -> Result<i32, StateError> {
        let mut b = [0u8; 4];
        self.get_bytes(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    pub fn get_u64(&mut self) -> Result<u64, StateError> {
        let mut b = [0u8; 8];
        self.get_bytes(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn get_i64(&mut self) -> Result<i64, StateError> {
        let mut b = [0u8; 8];
        self.get_bytes(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    pub fn get_f64(&mut self) -> Result<f64, StateError> {
        let mut b = [0u8; 8];
        self.get_bytes(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    pub fn get_u16s(&mut self, out: &mut [u16]) -> Result<(), StateError> {
        for x in out {
            *x = self.get_u16()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let mut buf = Vec::new();
        {
            let mut w = StateWriter::new(&mut buf);
            w.put_u8(0xAB).unwrap();
            w.put_bool(true).unwrap();
            w.put_u16(0x1234).unwrap();
            w.put_u32(0xDEAD_BEEF).unwrap();
            w.put_i64(-42).unwrap();
            w.put_f64(0.25).unwrap();
        }
        let mut cur = buf.as_slice();
        let mut r = StateReader::new(&mut cur);
        assert_eq!(r.get_u8().unwrap(), 0xAB);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.get_i64().unwrap(), -42);
        assert_eq!(r.get_f64().unwrap(), 0.25);
    }

    #[test]
    fn bool_rejects_junk() {
        let mut cur = &[7u8][..];
        let mut r = StateReader::new(&mut cur);
        assert!(matches!(r.get_bool(), Err(StateError::Corrupt)));
    }

    #[test]
    fn short_stream_is_io_error() {
        let mut cur = &[0u8][..];
        let mut r = StateReader::new(&mut cur);
        assert!(matches!(r.get_u32(), Err(StateError::Io(_))));
    }

    #[test]
    fn check_maps_to_corrupt() {
        assert!(check(true).is_ok());
        assert!(matches!(check(false), Err(StateError::Corrupt)));
    }
}

use crate::errors::ConversionError;

/// Cursor over a big-endian encoded byte slice.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ConversionError> {
        let end = self.offset.saturating_add(len);
        if end > self.bytes.len() {
            return Err(ConversionError::InsufficientData { expected: end, got: self.bytes.len() });
        }

        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ConversionError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ConversionError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ConversionError> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Reads a `u32` length prefix.
    pub fn read_len(&mut self) -> Result<usize, ConversionError> {
        self.read_u32().map(|len| len as usize)
    }

    /// Returns everything which has not been read yet and exhausts the reader.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        rest
    }

    /// Fails if any unread bytes are left.
    pub fn finish(self) -> Result<(), ConversionError> {
        if self.offset < self.bytes.len() {
            return Err(ConversionError::TooMuchData {
                expected: self.offset,
                got: self.bytes.len(),
            });
        }
        Ok(())
    }
}

/// Appends a `u32` length prefix followed by the bytes.
pub(crate) fn write_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

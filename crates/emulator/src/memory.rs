//! Flat little-endian memory image covering one contiguous address window.

use crate::fault::FaultKind;

/// Byte-addressed memory starting at `base`.
///
/// Every access is bounds-checked against `[base, base + len)`; there is no
/// alignment requirement for data accesses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    base: u32,
    bytes: Box<[u8]>,
}

impl Memory {
    /// Zero-filled image of `len` bytes at `base`.
    #[must_use]
    pub fn new(base: u32, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len].into_boxed_slice(),
        }
    }

    /// First mapped address.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Mapped byte count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when nothing is mapped.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One past the last mapped address.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.base) + self.bytes.len() as u64
    }

    /// True when `[address, address + size)` is mapped.
    #[must_use]
    pub fn contains(&self, address: u32, size: u32) -> bool {
        self.offset(address, size).is_ok()
    }

    /// Reads `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FaultKind::InvalidMemoryAccess`] when any byte is unmapped.
    pub fn read(&self, address: u32, size: u32) -> Result<&[u8], FaultKind> {
        let range = self.offset(address, size)?;
        Ok(&self.bytes[range])
    }

    /// Writes `data` starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`FaultKind::InvalidMemoryAccess`] when any byte is unmapped;
    /// nothing is written in that case.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FaultKind> {
        let size = u32::try_from(data.len()).map_err(|_| FaultKind::InvalidMemoryAccess {
            address,
            size: u32::MAX,
        })?;
        let range = self.offset(address, size)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// See [`Self::read`].
    pub fn read_u8(&self, address: u32) -> Result<u8, FaultKind> {
        Ok(self.read(address, 1)?[0])
    }

    /// Reads a little-endian word.
    ///
    /// # Errors
    ///
    /// See [`Self::read`].
    pub fn read_u32(&self, address: u32) -> Result<u32, FaultKind> {
        let bytes = self.read(address, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Writes one byte.
    ///
    /// # Errors
    ///
    /// See [`Self::write`].
    pub fn write_u8(&mut self, address: u32, value: u8) -> Result<(), FaultKind> {
        self.write(address, &[value])
    }

    /// Writes a little-endian word.
    ///
    /// # Errors
    ///
    /// See [`Self::write`].
    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<(), FaultKind> {
        self.write(address, &value.to_le_bytes())
    }

    fn offset(&self, address: u32, size: u32) -> Result<std::ops::Range<usize>, FaultKind> {
        let fault = FaultKind::InvalidMemoryAccess { address, size };
        let start = address.checked_sub(self.base).ok_or(fault)?;
        let start = usize::try_from(start).map_err(|_| fault)?;
        let len = usize::try_from(size).map_err(|_| fault)?;
        let end = start.checked_add(len).ok_or(fault)?;
        if end > self.bytes.len() {
            return Err(fault);
        }
        Ok(start..end)
    }
}

use crate::bus::Bus;
use crate::Cycle;

/// Byte-based RAM implementation with support for misaligned memory access.
///
/// This is *main memory* in terms of the RISC-V privileged architecture's physical memory
/// attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ram {
    data: Box<[u8]>,
}

impl Ram {
    /// Create a new zero-initialized RAM resource that can hold `size` bytes.
    ///
    /// `size` must be at least one, and at most `1 << 32` (since it must be addressable by `u32`).
    /// If `size` does not satisfy these conditions, `None` is returned and nothing is allocated.
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 || (usize::BITS > 32 && size > (1 << 32)) {
            None
        } else {
            Some(Self {
                data: vec![0; size].into_boxed_slice(),
            })
        }
    }

    /// Returns the size expressed in bytes. Guaranteed to be at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if all `size` bytes starting at `address` are stored in this RAM.
    pub fn contains(&self, address: u32, size: u32) -> bool {
        (address as usize)
            .checked_add(size as usize)
            .is_some_and(|end| end <= self.data.len())
    }

    /// Force RAM back to its reset state, which is all-zeros.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Reads a range of bytes from RAM into `buf`. Does not have side effects.
    ///
    /// Elements in `buf` corresponding to addresses outside of the RAM are left untouched.
    pub fn read(&self, buf: &mut [u8], address: u32) {
        const_assert!(usize::BITS >= 32);
        let start = address as usize;
        if start >= self.data.len() {
            return;
        }
        let size = buf.len().min(self.data.len() - start);
        buf[..size].copy_from_slice(&self.data[start..start + size]);
    }

    /// Writes a range of bytes from `buf` into RAM.
    ///
    /// Bytes that would land outside of the RAM are ignored.
    pub fn write(&mut self, address: u32, buf: &[u8]) {
        const_assert!(usize::BITS >= 32);
        let start = address as usize;
        if start >= self.data.len() {
            return;
        }
        let size = buf.len().min(self.data.len() - start);
        self.data[start..start + size].copy_from_slice(&buf[..size]);
    }
}

impl Bus for Ram {
    fn read(&mut self, _now: Cycle, address: u32, buf: &mut [u8]) {
        Ram::read(self, buf, address);
    }

    fn write(&mut self, _now: Cycle, address: u32, buf: &[u8]) {
        Ram::write(self, address, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaddressable_sizes() {
        assert!(Ram::new(0).is_none());
        assert_eq!(16, Ram::new(16).unwrap().len());
    }

    #[test]
    fn partial_accesses_at_the_end() {
        let mut ram = Ram::new(8).unwrap();
        ram.write(6, &[1, 2, 3, 4]);
        let mut buf = [0xAA; 4];
        ram.read(&mut buf, 6);
        assert_eq!([1, 2, 0xAA, 0xAA], buf);
        assert!(ram.contains(4, 4));
        assert!(!ram.contains(6, 4));
        assert!(!ram.contains(u32::MAX, 4));
    }

    #[test]
    fn reset_clears() {
        let mut ram = Ram::new(4).unwrap();
        Bus::write(&mut ram, 0, 0, &[0xFF; 4]);
        ram.reset();
        let mut buf = [0xAA; 4];
        Bus::read(&mut ram, 0, 0, &mut buf);
        assert_eq!([0; 4], buf);
    }
}

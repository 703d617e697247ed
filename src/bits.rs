use crate::error::{Error, Result};

/// MSB-first bit reader over entropy-coded JPEG scan data.
///
/// Stuffed `FF 00` sequences are read as a single `FF` byte. When a marker is reached, the reader
/// stops consuming input and supplies zero bits until [`BitReader::restart`] moves past it.
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
    /// Left-aligned bit buffer.
    acc: u64,
    /// Number of valid bits in `acc` (0-64).
    left: u32,
    /// Set once the reader has run into a marker (or the end of the data).
    marker: Option<u8>,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: 0,
            acc: 0,
            left: 0,
            marker: None,
        }
    }

    /// Ensures that there are at least 57 readable bits in the buffer.
    pub fn refill(&mut self) {
        while self.left <= 56 {
            let byte = self.next_byte();
            self.acc |= u64::from(byte) << (56 - self.left);
            self.left += 8;
        }
    }

    fn next_byte(&mut self) -> u8 {
        if self.marker.is_some() {
            return 0;
        }
        loop {
            match self.data.get(self.position..) {
                Some([0xff, 0x00, ..]) => {
                    self.position += 2;
                    return 0xff;
                }
                // Fill byte in front of a marker.
                Some([0xff, 0xff, ..]) => self.position += 1,
                Some([0xff, marker, ..]) => {
                    self.marker = Some(*marker);
                    return 0;
                }
                Some([byte, ..]) if *byte != 0xff => {
                    self.position += 1;
                    return *byte;
                }
                _ => {
                    // End of data, or a lone trailing `FF`. Behaves like an `EOI` marker.
                    self.marker = Some(0xD9);
                    return 0;
                }
            }
        }
    }

    /// Removes `n` bits from the buffer.
    #[inline]
    pub fn consume(&mut self, n: u32) {
        debug_assert!(n > 0 && n <= 32 && n <= self.left);
        self.acc <<= n;
        self.left -= n;
    }

    /// Peeks at the next `n` bits.
    #[inline]
    pub fn peek(&self, n: u32) -> u32 {
        debug_assert!(n > 0 && n <= 32 && n <= self.left);
        (self.acc >> (64 - n)) as u32
    }

    /// Reads `n` bits (0-16) as an unsigned integer.
    pub fn receive(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        if self.left < n {
            self.refill();
        }
        let value = self.peek(n);
        self.consume(n);
        value
    }

    /// Reads an `n`-bit magnitude and sign-extends it (the `EXTEND` procedure of Annex F).
    pub fn receive_extend(&mut self, n: u32) -> i32 {
        if n == 0 {
            return 0;
        }
        let value = self.receive(n) as i32;
        if value < 1 << (n - 1) {
            value - (1 << n) + 1
        } else {
            value
        }
    }

    /// Skips to the end of the current restart interval and past the `RSTn` marker that ends it.
    ///
    /// `expected` is the marker number (0-7) the next `RSTn` marker must carry.
    pub fn restart(&mut self, expected: u8) -> Result<()> {
        // Discard the padding bits of the interval just finished.
        self.acc = 0;
        self.left = 0;

        // Only padding should precede the marker, but tolerate garbage in between.
        let marker = loop {
            if let Some(m) = self.marker.take() {
                break m;
            }
            self.next_byte();
        };

        if marker != 0xD0 + expected {
            self.marker = Some(marker);
            return Err(Error::from(format!(
                "expected RST{expected} marker in scan data, found ff {marker:02x}"
            )));
        }
        self.position += 2;
        Ok(())
    }
}

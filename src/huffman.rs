use core::fmt;

use crate::{
    bits::BitReader,
    error::{Error, Result},
};

/// Number of bits resolved by a single lookup in [`HuffmanLut::lookahead`].
const LOOKAHEAD_BITS: u32 = 9;

/// The list of canonical huffman codes described by a DHT table.
pub struct TableData {
    codes: Vec<(u16, LookupResult)>,
}

impl TableData {
    pub fn build(num_codes_per_length: &[u8; 16], codes: &[u8]) -> Result<Self> {
        let mut out = Vec::with_capacity(codes.len());

        // The following is similar in function to the flowcharts in Annex C
        // (`Generate_size_table` and `Generate_code_table`)
        let mut next_code = 0u32;
        let mut code_iter = codes.iter();
        for (code_length, &code_count) in num_codes_per_length.iter().enumerate() {
            let code_length = (code_length + 1) as u8; // 1-based

            for _ in 0..code_count {
                let value = *code_iter
                    .next()
                    .ok_or_else(|| Error::from("huffman table has fewer values than codes"))?;
                out.push((next_code as u16, LookupResult::new(code_length, value)));
                next_code += 1;
            }

            // All-ones codes are reserved, so a full length would make the table unusable.
            if next_code >= 1 << code_length {
                return Err(Error::from(format!(
                    "huffman table is over-subscribed at code length {code_length}"
                )));
            }

            next_code <<= 1;
        }

        Ok(Self { codes: out })
    }
}

impl fmt::Debug for TableData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &(code, lookup) in &self.codes {
            let bits = lookup.bits;
            let value = lookup.value;
            writeln!(
                f,
                "{bits} {:01$b} -> {2:02x}",
                code,
                usize::from(bits),
                value,
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
struct LookupResult {
    /// Length of the huffman code in bits (number of bits that need to be consumed from the input).
    /// 0 marks an empty lookahead slot.
    bits: u8,
    /// Decoded value. Meaning depends on table class (AC/DC).
    value: u8,
}

impl LookupResult {
    fn new(bits: u8, value: u8) -> Self {
        Self { bits, value }
    }
}

/// Decoding tables for one DHT huffman table.
///
/// Codes of up to [`LOOKAHEAD_BITS`] bits are resolved with a single table lookup; longer codes
/// fall back to a per-length comparison against the largest code of that length.
pub struct HuffmanLut {
    lookahead: Box<[LookupResult; 1 << LOOKAHEAD_BITS]>,
    /// Largest code of each length (index 1-16), or -1 if there are none.
    maxcode: [i32; 17],
    /// Offset to add to a code of each length to get its index in `values`.
    valoffset: [i32; 17],
    values: Vec<u8>,
}

impl HuffmanLut {
    pub fn new(table: &TableData) -> Self {
        let mut lookahead = Box::new([LookupResult::default(); 1 << LOOKAHEAD_BITS]);
        let mut maxcode = [-1; 17];
        let mut valoffset = [0; 17];
        let mut values = Vec::with_capacity(table.codes.len());

        for (index, &(code, lookup)) in table.codes.iter().enumerate() {
            let len = usize::from(lookup.bits);
            if maxcode[len] < 0 {
                valoffset[len] = index as i32 - i32::from(code);
            }
            maxcode[len] = i32::from(code);
            values.push(lookup.value);

            if u32::from(lookup.bits) <= LOOKAHEAD_BITS {
                // Every slot whose leading bits equal the code decodes to it.
                let pad = LOOKAHEAD_BITS - u32::from(lookup.bits);
                let base = usize::from(code) << pad;
                lookahead[base..base + (1 << pad)].fill(lookup);
            }
        }

        Self {
            lookahead,
            maxcode,
            valoffset,
            values,
        }
    }

    /// Decodes the next huffman-coded symbol from `bits`.
    pub fn decode(&self, bits: &mut BitReader<'_>) -> Result<u8> {
        bits.refill();

        let slot = self.lookahead[bits.peek(LOOKAHEAD_BITS) as usize];
        if slot.bits != 0 {
            bits.consume(slot.bits.into());
            return Ok(slot.value);
        }

        for len in LOOKAHEAD_BITS + 1..=16 {
            let code = bits.peek(len) as i32;
            if code <= self.maxcode[len as usize] {
                bits.consume(len);
                let index = self.valoffset[len as usize] + code;
                return Ok(self.values[index as usize]);
            }
        }

        Err(Error::from("invalid huffman code in scan data"))
    }
}

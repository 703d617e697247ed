//! Marker segment reader for JPEG interchange streams.
//!
//! [`SegmentReader`] walks the `FF xx` segments between `SOI` and `EOI` and decodes the table and
//! header segments needed for sequential decoding. Everything else is passed through as raw bytes.

#[cfg(test)]
mod tests;

use std::fmt;

use crate::error::{Error, Result};

/// A marker code, the byte following `FF`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Marker(pub u8);

impl Marker {
    /// Baseline DCT.
    pub const SOF0: Self = Self(0xC0);
    /// Extended sequential DCT.
    pub const SOF1: Self = Self(0xC1);
    pub const DHT: Self = Self(0xC4);
    pub const SOI: Self = Self(0xD8);
    pub const EOI: Self = Self(0xD9);
    pub const SOS: Self = Self(0xDA);
    pub const DQT: Self = Self(0xDB);
    pub const DRI: Self = Self(0xDD);

    /// Returns whether this is one of the 13 start-of-frame markers.
    pub fn is_sof(self) -> bool {
        matches!(self.0, 0xC0..=0xCF) && !matches!(self.0, 0xC4 | 0xC8 | 0xCC)
    }

    pub fn is_rst(self) -> bool {
        matches!(self.0, 0xD0..=0xD7)
    }

    /// Markers without a length field.
    fn is_standalone(self) -> bool {
        self.is_rst() || matches!(self.0, 0x01 | 0xD8 | 0xD9)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            n if self.is_sof() => write!(f, "SOF{}", n - 0xC0),
            n @ 0xD0..=0xD7 => write!(f, "RST{}", n - 0xD0),
            n @ 0xE0..=0xEF => write!(f, "APP{}", n - 0xE0),
            0xC4 => f.write_str("DHT"),
            0xCC => f.write_str("DAC"),
            0xD8 => f.write_str("SOI"),
            0xD9 => f.write_str("EOI"),
            0xDA => f.write_str("SOS"),
            0xDB => f.write_str("DQT"),
            0xDC => f.write_str("DNL"),
            0xDD => f.write_str("DRI"),
            0xFE => f.write_str("COM"),
            n => write!(f, "FF {n:02X}"),
        }
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

pub struct SegmentReader<'a> {
    cursor: Cursor<'a>,
}

impl<'a> SegmentReader<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor { buf, pos: 0 };
        if cursor.u8()? != 0xFF || Marker(cursor.u8()?) != Marker::SOI {
            return Err(Error::from("JPEG image does not start with SOI marker"));
        }
        Ok(Self { cursor })
    }

    /// Returns the next segment, or `None` after `EOI`.
    ///
    /// Bytes before a marker are skipped, as are `FF` fill bytes. A scan segment extends over its
    /// entropy-coded data, which ends at the first marker other than `RSTn`.
    pub fn next_segment(&mut self) -> Result<Option<Segment<'a>>> {
        let mut skipped = 0;
        while self.cursor.u8()? != 0xFF {
            skipped += 1;
        }
        if skipped != 0 {
            log::warn!("skipped {skipped} bytes of garbage before marker");
        }

        let mut code = self.cursor.u8()?;
        while code == 0xFF {
            code = self.cursor.u8()?;
        }
        let marker = Marker(code);
        let offset = self.cursor.pos - 2;

        if code == 0x00 {
            return Err(Error::from("invalid ff 00 marker"));
        }
        if marker == Marker::EOI {
            let trailing = self.cursor.rest().len();
            if trailing != 0 {
                log::warn!("ignoring {trailing} trailing bytes after EOI");
            }
            return Ok(None);
        }
        if marker.is_standalone() {
            return Err(Error::from(format!(
                "unexpected {marker} marker outside of scan data"
            )));
        }

        let mut payload = Cursor {
            buf: self.cursor.segment_payload()?,
            pos: 0,
        };
        let body = match marker {
            Marker::DQT => Body::Quantization(read_dqt(&mut payload)?),
            Marker::DHT => Body::Huffman(read_dht(&mut payload)?),
            Marker::DRI => Body::RestartInterval(payload.u16()?),
            m if m.is_sof() => Body::Frame(read_frame(m, &mut payload)?),
            Marker::SOS => {
                let scan = read_scan(&mut payload)?;
                let data = self.cursor.entropy_coded_data()?;
                Body::Scan(ScanHeader { data, ..scan })
            }
            _ => Body::Other(payload.take(payload.buf.len())?),
        };

        let unused = payload.rest().len();
        if unused != 0 {
            log::warn!(
                "{marker} segment has {unused} unused bytes out of {}",
                payload.buf.len()
            );
        }

        Ok(Some(Segment {
            marker,
            offset,
            body,
        }))
    }
}

fn read_dqt(payload: &mut Cursor<'_>) -> Result<Vec<QuantTable>> {
    let mut tables = Vec::new();
    while !payload.rest().is_empty() {
        let pq_tq = payload.u8()?;
        let precision = match pq_tq >> 4 {
            0 => 8,
            1 => 16,
            pq => return Err(Error::from(format!("invalid quantization table precision {pq}"))),
        };
        let mut values = [0; 64];
        for value in &mut values {
            *value = match precision {
                8 => payload.u8()?.into(),
                _ => payload.u16()?,
            };
        }
        tables.push(QuantTable {
            precision,
            dest: pq_tq & 0xF,
            values,
        });
    }
    Ok(tables)
}

fn read_dht<'a>(payload: &mut Cursor<'a>) -> Result<Vec<HuffmanSpec<'a>>> {
    let mut tables = Vec::new();
    while !payload.rest().is_empty() {
        let tc_th = payload.u8()?;
        let mut counts = [0; 16];
        counts.copy_from_slice(payload.take(16)?);
        let total = counts.iter().map(|&n| usize::from(n)).sum();
        tables.push(HuffmanSpec {
            class: tc_th >> 4,
            dest: tc_th & 0xF,
            counts,
            values: payload.take(total)?,
        });
    }
    Ok(tables)
}

fn read_frame(marker: Marker, payload: &mut Cursor<'_>) -> Result<FrameHeader> {
    let precision = payload.u8()?;
    let height = payload.u16()?;
    let width = payload.u16()?;
    let count = payload.u8()?;
    let components = (0..count)
        .map(|_| {
            let id = payload.u8()?;
            let sampling = payload.u8()?;
            Ok(FrameComponent {
                id,
                h_samp: sampling >> 4,
                v_samp: sampling & 0xF,
                qtable: payload.u8()?,
            })
        })
        .collect::<Result<_>>()?;
    Ok(FrameHeader {
        marker,
        precision,
        height,
        width,
        components,
    })
}

fn read_scan<'a>(payload: &mut Cursor<'a>) -> Result<ScanHeader<'a>> {
    let count = payload.u8()?;
    let components = (0..count)
        .map(|_| {
            let selector = payload.u8()?;
            let tables = payload.u8()?;
            Ok(ScanComponent {
                selector,
                dc_table: tables >> 4,
                ac_table: tables & 0xF,
            })
        })
        .collect::<Result<_>>()?;
    let ss = payload.u8()?;
    let se = payload.u8()?;
    let ah_al = payload.u8()?;
    Ok(ScanHeader {
        components,
        spectral: (ss, se),
        approx: (ah_al >> 4, ah_al & 0xF),
        data: &[],
    })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn eof() -> Error {
        Error::from("reached end of data while decoding JPEG stream")
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn peek(&self, offset: usize) -> Result<u8> {
        self.buf
            .get(self.pos + offset)
            .copied()
            .ok_or_else(Self::eof)
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = self.peek(0)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = self.rest().get(..len).ok_or_else(Self::eof)?;
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a segment length and returns the parameter bytes it covers.
    fn segment_payload(&mut self) -> Result<&'a [u8]> {
        // The length counts itself but not the marker.
        let len = self.u16()?;
        if len < 2 {
            return Err(Error::from(format!("invalid segment length {len}")));
        }
        self.take(usize::from(len - 2))
    }

    /// Consumes entropy-coded data up to the next marker that isn't `RSTn`.
    ///
    /// Stuffed `FF 00` pairs and `RSTn` markers stay in the returned slice.
    fn entropy_coded_data(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        loop {
            while self.peek(0)? != 0xFF {
                self.pos += 1;
            }
            let mut len = 1;
            while self.peek(len)? == 0xFF {
                len += 1;
            }
            let code = self.peek(len)?;
            if code == 0x00 || Marker(code).is_rst() {
                self.pos += len + 1;
            } else {
                // Leave the last `FF` for `next_segment`.
                self.pos += len - 1;
                return Ok(&self.buf[start..self.pos]);
            }
        }
    }
}

/// A segment of a JPEG stream, introduced by an `FF xx` marker.
#[derive(Debug)]
pub struct Segment<'a> {
    pub marker: Marker,
    /// Position of the `FF` byte in the input.
    pub offset: usize,
    pub body: Body<'a>,
}

impl fmt::Display for Segment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X} {} {}", self.offset, self.marker, self.body)
    }
}

#[derive(Debug)]
pub enum Body<'a> {
    Quantization(Vec<QuantTable>),
    Huffman(Vec<HuffmanSpec<'a>>),
    RestartInterval(u16),
    Frame(FrameHeader),
    Scan(ScanHeader<'a>),
    /// Payload of a segment that isn't interpreted (`APPn`, `COM`, ...).
    Other(&'a [u8]),
}

impl fmt::Display for Body<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Quantization(tables) => {
                let tables: Vec<_> = tables
                    .iter()
                    .map(|t| format!("{}:{}-bit", t.dest, t.precision))
                    .collect();
                write!(f, "tables {}", tables.join(" "))
            }
            Body::Huffman(tables) => {
                let tables: Vec<_> = tables
                    .iter()
                    .map(|t| {
                        let class = if t.class == 0 { "dc" } else { "ac" };
                        format!("{class}{}:{}", t.dest, t.values.len())
                    })
                    .collect();
                write!(f, "tables {}", tables.join(" "))
            }
            Body::RestartInterval(interval) => write!(f, "interval {interval}"),
            Body::Frame(frame) => {
                write!(f, "{}-bit {}x{}", frame.precision, frame.width, frame.height)?;
                for c in &frame.components {
                    write!(f, " {}:{}x{}/q{}", c.id, c.h_samp, c.v_samp, c.qtable)?;
                }
                Ok(())
            }
            Body::Scan(scan) => {
                for c in &scan.components {
                    write!(f, "{}:dc{}/ac{} ", c.selector, c.dc_table, c.ac_table)?;
                }
                write!(
                    f,
                    "Ss={} Se={} Ah={} Al={}, {} bytes",
                    scan.spectral.0,
                    scan.spectral.1,
                    scan.approx.0,
                    scan.approx.1,
                    scan.data.len()
                )
            }
            Body::Other(payload) => write!(f, "{} bytes skipped", payload.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuantTable {
    /// Element precision in bits, 8 or 16.
    pub precision: u8,
    pub dest: u8,
    /// Quantization values in zig-zag order.
    pub values: [u16; 64],
}

#[derive(Debug)]
pub struct HuffmanSpec<'a> {
    /// 0 = DC, 1 = AC.
    pub class: u8,
    pub dest: u8,
    /// Number of codes of each length from 1 to 16.
    pub counts: [u8; 16],
    pub values: &'a [u8],
}

#[derive(Debug)]
pub struct FrameHeader {
    pub marker: Marker,
    /// Sample precision in bits.
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub components: Vec<FrameComponent>,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameComponent {
    pub id: u8,
    pub h_samp: u8,
    pub v_samp: u8,
    pub qtable: u8,
}

#[derive(Debug)]
pub struct ScanHeader<'a> {
    pub components: Vec<ScanComponent>,
    /// Spectral selection start and end.
    pub spectral: (u8, u8),
    /// Successive approximation high and low bit positions.
    pub approx: (u8, u8),
    /// Entropy-coded data, including `RSTn` markers and byte stuffing.
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy)]
pub struct ScanComponent {
    /// Frame component id.
    pub selector: u8,
    pub dc_table: u8,
    pub ac_table: u8,
}

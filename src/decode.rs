//! Baseline decompressor emitting raw, non-upsampled component planes.
//!
//! The call sequence is [`Decompressor::new`], [`Decompressor::read_header`],
//! [`Decompressor::start`], then [`Decompressor::read_raw_data`] until
//! [`Decompressor::output_scanline`] reaches the image height, and finally
//! [`Decompressor::finish`]. Every call to `read_raw_data` decodes one iMCU row: `8 * max_v_samp`
//! image lines, stored at each component's native resolution.
//!
//! When the first scan carries every component, its entropy-coded data is decoded one iMCU row
//! at a time. Otherwise `start` decodes all scans into per-component coefficient buffers, and
//! `read_raw_data` only runs the inverse DCT.

use crate::{
    bits::BitReader,
    error::{Error, ErrorKind, Result},
    file::{Body, FrameHeader, Marker, ScanHeader, SegmentReader},
    huffman::{HuffmanLut, TableData},
    idct::{BlockTransform, DctMethod, ZIGZAG},
    image::Image,
};

macro_rules! bail {
    ($($args:tt)*) => {
        return Err(Error::from(format!($($args)*)))
    };
}

macro_rules! unsupported {
    ($($args:tt)*) => {
        return Err(Error::unsupported(format!($($args)*)))
    };
}

/// Maximum number of blocks in an interleaved MCU.
const MAX_BLOCKS_IN_MCU: u32 = 10;

/// Image geometry read from the frame header.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub max_h_samp: u8,
    pub max_v_samp: u8,
    /// Number of MCUs per restart interval of the first scan, 0 if restart markers are not used.
    pub restart_interval: u16,
    pub components: Vec<ComponentInfo>,
}

impl FrameInfo {
    fn new(sof: &FrameHeader) -> Result<Self> {
        if sof.marker != Marker::SOF0 && sof.marker != Marker::SOF1 {
            unsupported!("not a sequential Huffman-coded JPEG (SOF={})", sof.marker);
        }
        if sof.precision != 8 {
            unsupported!("sample precision of {} bits is not supported", sof.precision);
        }
        if sof.width == 0 || sof.height == 0 {
            unsupported!("image with {}x{} pixels", sof.width, sof.height);
        }
        let count = sof.components.len();
        if !(1..=4).contains(&count) {
            unsupported!("frame with {count} components is not supported");
        }

        for c in &sof.components {
            if !(1..=4).contains(&c.h_samp) || !(1..=4).contains(&c.v_samp) {
                bail!(
                    "invalid sampling factors {}x{} for component {}",
                    c.h_samp,
                    c.v_samp,
                    c.id,
                );
            }
            if c.qtable > 3 {
                bail!(
                    "invalid quantization table selection {} for component {} (only tables 0-3 are valid)",
                    c.qtable,
                    c.id,
                );
            }
        }

        let (width, height) = (u32::from(sof.width), u32::from(sof.height));
        let max_h_samp = sof.components.iter().map(|c| c.h_samp).max().unwrap_or(1);
        let max_v_samp = sof.components.iter().map(|c| c.v_samp).max().unwrap_or(1);
        let components = sof
            .components
            .iter()
            .map(|c| ComponentInfo {
                id: c.id,
                h_samp: c.h_samp,
                v_samp: c.v_samp,
                qtable: c.qtable,
                width_in_blocks: (width * u32::from(c.h_samp))
                    .div_ceil(8 * u32::from(max_h_samp)),
                height_in_blocks: (height * u32::from(c.v_samp))
                    .div_ceil(8 * u32::from(max_v_samp)),
            })
            .collect();

        Ok(Self {
            width,
            height,
            max_h_samp,
            max_v_samp,
            restart_interval: 0,
            components,
        })
    }

    /// Number of image lines covered by one iMCU row.
    pub fn imcu_height(&self) -> u32 {
        8 * u32::from(self.max_v_samp)
    }

    /// Number of iMCU rows needed to cover the image.
    pub fn imcu_rows(&self) -> u32 {
        self.height.div_ceil(self.imcu_height())
    }

    /// Number of MCUs per row of an interleaved scan.
    fn mcus_x(&self) -> u32 {
        self.width.div_ceil(8 * u32::from(self.max_h_samp))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComponentInfo {
    /// Component identifier `Ci`, as referenced by the scan header.
    pub id: u8,
    pub h_samp: u8,
    pub v_samp: u8,
    /// Quantization table selector.
    pub qtable: u8,
    /// Number of 8x8 blocks that carry image data, horizontally. Interleaved scans may contain
    /// additional padding blocks to complete the last MCU.
    pub width_in_blocks: u32,
    pub height_in_blocks: u32,
}

/// A horizontal strip of one output plane, receiving the samples of one iMCU row.
///
/// Rows are `stride` bytes apart. A band may be shorter than a full iMCU row at the bottom of
/// the plane; block rows that would fall below it must be padding.
#[derive(Default)]
pub struct RowBand<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> RowBand<'a> {
    pub fn new(data: &'a mut [u8], stride: usize) -> Self {
        Self { data, stride }
    }

    pub fn rows(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }
}

/// Tables and parameters defined by the markers read so far.
///
/// Every DHT segment appends a new lookup table, so scans keep referring to the tables that were
/// current when their header was read.
#[derive(Default)]
struct Tables {
    /// In row-major order.
    qtables: [Option<[u16; 64]>; 4],
    luts: Vec<HuffmanLut>,
    /// Indices into `luts`.
    dc: [Option<usize>; 4],
    ac: [Option<usize>; 4],
    restart_interval: u16,
}

impl Tables {
    /// Applies a DQT, DHT or DRI segment. Other segments are ignored.
    fn apply(&mut self, body: Body<'_>) -> Result<()> {
        match body {
            Body::Quantization(tables) => {
                for table in tables {
                    if table.precision != 8 {
                        unsupported!(
                            "{}-bit quantization table (only 8-bit tables are supported)",
                            table.precision
                        );
                    }
                    if table.dest > 3 {
                        bail!(
                            "invalid quantization table destination Tq={} (0-3 are allowed)",
                            table.dest
                        );
                    }

                    let mut natural = [0; 64];
                    for (&pos, &q) in ZIGZAG.iter().zip(&table.values) {
                        natural[usize::from(pos)] = q;
                    }
                    self.qtables[usize::from(table.dest)] = Some(natural);
                }
            }
            Body::Huffman(tables) => {
                for table in tables {
                    if table.dest > 3 {
                        bail!("invalid huffman table destination Th={}", table.dest);
                    }
                    let dest = match table.class {
                        0 => &mut self.dc,
                        1 => &mut self.ac,
                        tc => bail!("invalid table class Tc={tc} (only 0 and 1 are valid)"),
                    };
                    let data = TableData::build(&table.counts, table.values)?;
                    dest[usize::from(table.dest)] = Some(self.luts.len());
                    self.luts.push(HuffmanLut::new(&data));
                }
            }
            Body::RestartInterval(interval) => self.restart_interval = interval,
            Body::Frame(_) | Body::Scan(_) | Body::Other(_) => {}
        }
        Ok(())
    }
}

struct ScanEntry {
    /// Index into [`FrameInfo::components`].
    comp: usize,
    /// Indices into [`Tables::luts`].
    dc: usize,
    ac: usize,
}

struct Scan<'a> {
    entries: Vec<ScanEntry>,
    restart_interval: u16,
    data: &'a [u8],
}

/// The frame and every scan header read so far.
struct Header<'a> {
    frame: FrameInfo,
    /// Dequantization table of each frame component, taken when its first scan is read.
    qtables: Vec<Option<[u16; 64]>>,
    scans: Vec<Scan<'a>>,
}

impl<'a> Header<'a> {
    fn new(frame: FrameInfo) -> Self {
        Self {
            qtables: vec![None; frame.components.len()],
            frame,
            scans: Vec::new(),
        }
    }

    fn add_scan(&mut self, sos: ScanHeader<'a>, tables: &Tables) -> Result<()> {
        let frame = &self.frame;
        if sos.spectral != (0, 63) || sos.approx != (0, 0) {
            unsupported!(
                "non-sequential scan header (Ss={}, Se={}, Ah={}, Al={})",
                sos.spectral.0,
                sos.spectral.1,
                sos.approx.0,
                sos.approx.1,
            );
        }

        let mut entries = Vec::with_capacity(sos.components.len());
        for sc in &sos.components {
            let Some(comp) = frame.components.iter().position(|c| c.id == sc.selector) else {
                bail!("scan refers to unknown component {}", sc.selector);
            };
            if entries.iter().any(|e: &ScanEntry| e.comp == comp) {
                bail!("scan refers to component {} twice", sc.selector);
            }
            if self.qtables[comp].is_some() {
                bail!("component {} appears in more than one scan", sc.selector);
            }
            let Some(dc) = tables.dc.get(usize::from(sc.dc_table)).copied().flatten() else {
                bail!("component {} uses undefined DC table {}", sc.selector, sc.dc_table);
            };
            let Some(ac) = tables.ac.get(usize::from(sc.ac_table)).copied().flatten() else {
                bail!("component {} uses undefined AC table {}", sc.selector, sc.ac_table);
            };
            entries.push(ScanEntry { comp, dc, ac });
        }

        if entries.len() > 1 {
            let blocks: u32 = entries
                .iter()
                .map(|e| &frame.components[e.comp])
                .map(|c| u32::from(c.h_samp) * u32::from(c.v_samp))
                .sum();
            if blocks > MAX_BLOCKS_IN_MCU {
                bail!("MCU of {blocks} blocks exceeds the maximum of {MAX_BLOCKS_IN_MCU}");
            }
        }

        for entry in &entries {
            let info = &frame.components[entry.comp];
            match tables.qtables[usize::from(info.qtable)] {
                Some(q) => self.qtables[entry.comp] = Some(q),
                None => bail!(
                    "component {} uses undefined quantization table {}",
                    info.id,
                    info.qtable
                ),
            }
        }

        log::trace!(
            "scan {} with {} of {} components",
            self.scans.len(),
            entries.len(),
            frame.components.len()
        );
        self.scans.push(Scan {
            entries,
            restart_interval: tables.restart_interval,
            data: sos.data,
        });
        Ok(())
    }

    /// Returns the scan if the frame consists of one scan carrying every component.
    fn single_scan(&self) -> Option<&Scan<'a>> {
        match &self.scans[..] {
            [scan] if scan.entries.len() == self.frame.components.len() => Some(scan),
            _ => None,
        }
    }

    /// Returns the first component no scan has carried yet.
    fn missing_component(&self) -> Option<&ComponentInfo> {
        self.frame
            .components
            .iter()
            .zip(&self.qtables)
            .find_map(|(info, q)| q.is_none().then_some(info))
    }
}

/// Huffman decoding state of one scan.
struct EntropyDecoder<'a> {
    bits: BitReader<'a>,
    restart_interval: u16,
    /// DC predictors, one per frame component.
    pred: [i32; 4],
    mcus_done: u32,
    next_rst: u8,
    coefs: [i32; 64],
}

impl<'a> EntropyDecoder<'a> {
    fn new(scan: &Scan<'a>) -> Self {
        Self {
            bits: BitReader::new(scan.data),
            restart_interval: scan.restart_interval,
            pred: [0; 4],
            mcus_done: 0,
            next_rst: 0,
            coefs: [0; 64],
        }
    }

    /// Consumes the `RSTn` marker ending the previous restart interval, if there is one.
    fn begin_mcu(&mut self) -> Result<()> {
        let ri = u32::from(self.restart_interval);
        if ri != 0 && self.mcus_done != 0 && self.mcus_done % ri == 0 {
            self.bits.restart(self.next_rst)?;
            self.next_rst = (self.next_rst + 1) & 7;
            self.pred = [0; 4];
        }
        self.mcus_done += 1;
        Ok(())
    }

    /// Decodes the quantized coefficients of the next block into `self.coefs` (row-major).
    fn decode_block(&mut self, comp: usize, dc: &HuffmanLut, ac: &HuffmanLut) -> Result<()> {
        let coefs = &mut self.coefs;
        coefs.fill(0);

        let t = dc.decode(&mut self.bits)?;
        if t > 11 {
            bail!("DC difference category {t} out of range");
        }
        self.pred[comp] += self.bits.receive_extend(t.into());
        coefs[0] = self.pred[comp];

        let mut k = 1;
        while k < 64 {
            let rs = ac.decode(&mut self.bits)?;
            let (r, s) = (usize::from(rs >> 4), rs & 0xf);
            if s == 0 {
                if r != 15 {
                    // EOB
                    break;
                }
                k += 16;
                continue;
            }
            k += r;
            if k > 63 {
                bail!("AC coefficient index {k} out of range");
            }
            coefs[usize::from(ZIGZAG[k])] = self.bits.receive_extend(s.into());
            k += 1;
        }

        Ok(())
    }

    /// Decodes the blocks of `scan` that belong to iMCU row `imcu_row`.
    ///
    /// `sink` receives the component index, the block row and column within the component, and
    /// the block's coefficients. Padding blocks of interleaved MCUs are decoded but not passed
    /// on.
    fn decode_imcu_row(
        &mut self,
        frame: &FrameInfo,
        scan: &Scan<'_>,
        luts: &[HuffmanLut],
        imcu_row: u32,
        mut sink: impl FnMut(usize, u32, u32, &[i32; 64]) -> Result<()>,
    ) -> Result<()> {
        if let [entry] = &scan.entries[..] {
            // Non-interleaved: every MCU is a single block, in the component's raster order.
            let comp = &frame.components[entry.comp];
            let (dc, ac) = (&luts[entry.dc], &luts[entry.ac]);
            let v = u32::from(comp.v_samp);
            for row in 0..v {
                let block_row = imcu_row * v + row;
                if block_row >= comp.height_in_blocks {
                    break;
                }
                for col in 0..comp.width_in_blocks {
                    self.begin_mcu()?;
                    self.decode_block(entry.comp, dc, ac)?;
                    sink(entry.comp, block_row, col, &self.coefs)?;
                }
            }
            return Ok(());
        }

        for mcu_x in 0..frame.mcus_x() {
            self.begin_mcu()?;
            for entry in &scan.entries {
                let comp = &frame.components[entry.comp];
                let (dc, ac) = (&luts[entry.dc], &luts[entry.ac]);
                let (h, v) = (u32::from(comp.h_samp), u32::from(comp.v_samp));
                for y in 0..v {
                    for x in 0..h {
                        self.decode_block(entry.comp, dc, ac)?;

                        let block_row = imcu_row * v + y;
                        let block_col = mcu_x * h + x;
                        if block_row < comp.height_in_blocks && block_col < comp.width_in_blocks {
                            sink(entry.comp, block_row, block_col, &self.coefs)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where `read_raw_data` gets its coefficients from.
enum Source<'a> {
    /// The single scan, decoded one iMCU row per call.
    Stream(EntropyDecoder<'a>),
    /// Quantized coefficients of every block of every component, decoded by `start`.
    Buffered(Vec<Vec<[i32; 64]>>),
}

struct ScanState<'a> {
    /// One per frame component.
    transforms: Vec<BlockTransform>,
    source: Source<'a>,
}

impl<'a> ScanState<'a> {
    fn new(header: &Header<'a>, luts: &[HuffmanLut], method: DctMethod) -> Result<Self> {
        let transforms = header
            .frame
            .components
            .iter()
            .zip(&header.qtables)
            .map(|(c, q)| match q {
                Some(q) => Ok(BlockTransform::new(method, q)),
                None => Err(Error::from(format!("component {} is not part of any scan", c.id))),
            })
            .collect::<Result<Vec<_>>>()?;

        let source = match header.single_scan() {
            Some(scan) => Source::Stream(EntropyDecoder::new(scan)),
            None => {
                let mut buffers = header
                    .frame
                    .components
                    .iter()
                    .map(|c| c.width_in_blocks as usize * c.height_in_blocks as usize)
                    .map(alloc_blocks)
                    .collect::<Result<Vec<_>>>()?;
                decode_scans(header, luts, &mut buffers)?;
                Source::Buffered(buffers)
            }
        };

        Ok(Self { transforms, source })
    }

    fn rewind(&mut self, header: &Header<'a>, luts: &[HuffmanLut]) -> Result<()> {
        match (&mut self.source, header.single_scan()) {
            (Source::Stream(decoder), Some(scan)) => *decoder = EntropyDecoder::new(scan),
            (Source::Buffered(buffers), None) => decode_scans(header, luts, buffers)?,
            _ => bail!("scan layout changed since decoding was started"),
        }
        Ok(())
    }
}

fn alloc_blocks(len: usize) -> Result<Vec<[i32; 64]>> {
    let mut blocks = Vec::new();
    blocks.try_reserve_exact(len).map_err(|_| {
        Error::new(
            ErrorKind::OutOfMemory,
            format!("could not allocate {len} coefficient blocks"),
        )
    })?;
    blocks.resize(len, [0; 64]);
    Ok(blocks)
}

/// Decodes every scan of a multi-scan frame into `buffers`, one per frame component, each holding
/// `width_in_blocks * height_in_blocks` blocks in raster order.
fn decode_scans(
    header: &Header<'_>,
    luts: &[HuffmanLut],
    buffers: &mut [Vec<[i32; 64]>],
) -> Result<()> {
    let frame = &header.frame;
    for scan in &header.scans {
        let mut decoder = EntropyDecoder::new(scan);
        for imcu_row in 0..frame.imcu_rows() {
            decoder.decode_imcu_row(frame, scan, luts, imcu_row, |comp, row, col, coefs| {
                let width = frame.components[comp].width_in_blocks;
                buffers[comp][(row * width + col) as usize] = *coefs;
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// Reconstructs the block `coefs` of component `comp` into `band` at the given block position.
fn store(
    transform: &BlockTransform,
    coefs: &[i32; 64],
    comp: usize,
    band: &mut RowBand<'_>,
    block_row: usize,
    block_col: usize,
) -> Result<()> {
    let stride = band.stride;
    let offset = block_row * 8 * stride + block_col * 8;
    if block_col * 8 + 8 > stride || offset + 7 * stride + 8 > band.data.len() {
        bail!(
            "raw data band of component {comp} ({} rows of {stride} samples) is too small for block ({block_row}, {block_col})",
            band.rows(),
        );
    }
    transform.transform(coefs, &mut band.data[offset..], stride);
    Ok(())
}

/// A JPEG decompressor reading from an in-memory buffer.
pub struct Decompressor<'a> {
    segments: SegmentReader<'a>,
    tables: Tables,
    header: Option<Header<'a>>,
    dct_method: DctMethod,
    state: Option<ScanState<'a>>,
    output_scanline: u32,
}

impl<'a> Decompressor<'a> {
    /// Attaches a decompressor to a complete JPEG file.
    pub fn new(jpeg: &'a [u8]) -> Result<Self> {
        Ok(Self {
            segments: SegmentReader::new(jpeg)?,
            tables: Tables::default(),
            header: None,
            dct_method: DctMethod::default(),
            state: None,
            output_scanline: 0,
        })
    }

    /// Reads all markers up to and including the first scan header.
    ///
    /// Returns an error if the stream is malformed, or if it is anything other than an 8-bit
    /// sequential Huffman-coded JPEG. Calling this again returns the cached frame information.
    pub fn read_header(&mut self) -> Result<&FrameInfo> {
        let header = self.take_header()?;
        Ok(&self.header.insert(header).frame)
    }

    /// Removes the header from `self`, reading it first if necessary.
    fn take_header(&mut self) -> Result<Header<'a>> {
        if let Some(header) = self.header.take() {
            return Ok(header);
        }

        let header = self.read_header_impl()?;
        log::debug!(
            "{}x{} frame, {} components, restart interval {}",
            header.frame.width,
            header.frame.height,
            header.frame.components.len(),
            header.frame.restart_interval,
        );
        Ok(header)
    }

    fn read_header_impl(&mut self) -> Result<Header<'a>> {
        let mut frame: Option<FrameInfo> = None;

        while let Some(segment) = self.segments.next_segment()? {
            log::trace!("{segment}");

            match segment.body {
                Body::Frame(sof) => {
                    if frame.is_some() {
                        bail!("encountered multiple SOF markers");
                    }
                    frame = Some(FrameInfo::new(&sof)?);
                }
                Body::Scan(sos) => {
                    let Some(mut frame) = frame else {
                        bail!("SOS not preceded by SOF header");
                    };
                    frame.restart_interval = self.tables.restart_interval;
                    let mut header = Header::new(frame);
                    header.add_scan(sos, &self.tables)?;
                    return Ok(header);
                }
                body => self.tables.apply(body)?,
            }
        }

        bail!("reached EOI before SOS marker (no image data)")
    }

    /// Reads the markers following the first scan, up to EOI.
    fn read_remaining_scans(
        segments: &mut SegmentReader<'a>,
        tables: &mut Tables,
        header: &mut Header<'a>,
    ) -> Result<()> {
        while let Some(segment) = segments.next_segment()? {
            log::trace!("{segment}");

            match segment.body {
                Body::Frame(_) => bail!("encountered multiple SOF markers"),
                Body::Scan(sos) => header.add_scan(sos, tables)?,
                body => tables.apply(body)?,
            }
        }

        if let Some(info) = header.missing_component() {
            bail!("component {} is not part of any scan", info.id);
        }
        log::debug!("frame consists of {} scans", header.scans.len());
        Ok(())
    }

    /// Selects the IDCT used by subsequent [`Decompressor::start`] calls.
    pub fn set_dct_method(&mut self, method: DctMethod) {
        self.dct_method = method;
    }

    /// Prepares for decoding, reading the header first if that hasn't happened yet.
    ///
    /// For a frame whose components are spread over several scans, this reads the remaining
    /// scans and decodes all of their coefficients.
    pub fn start(&mut self) -> Result<()> {
        let header = self.take_header()?;
        let header = self.header.insert(header);
        if header.missing_component().is_some() {
            Self::read_remaining_scans(&mut self.segments, &mut self.tables, header)?;
        }
        self.state = Some(ScanState::new(header, &self.tables.luts, self.dct_method)?);
        self.output_scanline = 0;
        Ok(())
    }

    /// Resets decoding to the start of the image, so that the same image can be decoded again
    /// without re-reading the headers.
    pub fn rewind(&mut self) -> Result<()> {
        if let (Some(header), Some(state)) = (&self.header, &mut self.state) {
            state.rewind(header, &self.tables.luts)?;
            self.output_scanline = 0;
            return Ok(());
        }
        self.start()
    }

    /// Returns the number of image lines decoded so far.
    #[inline]
    pub fn output_scanline(&self) -> u32 {
        self.output_scanline
    }

    /// Returns the number of lines each [`Decompressor::read_raw_data`] call produces, or 0 if
    /// the header has not been read.
    pub fn imcu_height(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.frame.imcu_height())
    }

    /// Decodes the next iMCU row into `bands`, one per frame component.
    ///
    /// `max_lines` is the capacity of the bands in image lines and must hold at least
    /// [`Decompressor::imcu_height`] lines. Returns the number of image lines decoded, 0 if all
    /// scanlines have already been read. Fails if [`Decompressor::start`] has not been called.
    pub fn read_raw_data(&mut self, bands: &mut [RowBand<'_>], max_lines: u32) -> Result<u32> {
        let (Some(header), Some(state)) = (&self.header, &mut self.state) else {
            bail!("`read_raw_data` called before `start`");
        };
        let frame = &header.frame;

        if self.output_scanline >= frame.height {
            log::warn!("application read more scanlines than the image has");
            return Ok(0);
        }
        let lines = frame.imcu_height();
        if max_lines < lines {
            bail!("raw data buffer holds {max_lines} lines, but an iMCU row has {lines}");
        }
        if bands.len() != frame.components.len() {
            bail!(
                "{} raw data bands passed for {} components",
                bands.len(),
                frame.components.len()
            );
        }

        let imcu_row = self.output_scanline / lines;
        let ScanState { transforms, source } = state;
        match source {
            Source::Stream(decoder) => {
                let scan = &header.scans[0];
                decoder.decode_imcu_row(
                    frame,
                    scan,
                    &self.tables.luts,
                    imcu_row,
                    |comp, block_row, block_col, coefs| {
                        let first = imcu_row * u32::from(frame.components[comp].v_samp);
                        store(
                            &transforms[comp],
                            coefs,
                            comp,
                            &mut bands[comp],
                            (block_row - first) as usize,
                            block_col as usize,
                        )
                    },
                )?;
            }
            Source::Buffered(buffers) => {
                for (comp, info) in frame.components.iter().enumerate() {
                    let v = u32::from(info.v_samp);
                    let width = info.width_in_blocks as usize;
                    for row in 0..v {
                        let block_row = imcu_row * v + row;
                        if block_row >= info.height_in_blocks {
                            break;
                        }
                        let blocks = &buffers[comp][block_row as usize * width..][..width];
                        for (col, coefs) in blocks.iter().enumerate() {
                            let band = &mut bands[comp];
                            store(&transforms[comp], coefs, comp, band, row as usize, col)?;
                        }
                    }
                }
            }
        }

        self.output_scanline += lines;
        Ok(lines)
    }

    /// Decodes all remaining iMCU rows into the planes of `image`.
    pub fn read_image(&mut self, image: &mut Image) -> Result<()> {
        let height = self.read_header()?.height;
        let lines = self.imcu_height();
        while self.output_scanline < height {
            let mut bands = image.bands(self.output_scanline, lines);
            self.read_raw_data(&mut bands, lines)?;
        }
        Ok(())
    }

    /// Completes decompression. Fails if not all scanlines have been read.
    pub fn finish(&mut self) -> Result<()> {
        let height = self.header.as_ref().map_or(0, |h| h.frame.height);
        if self.state.is_none() || self.output_scanline < height {
            bail!(
                "decompression finished after {} of {height} scanlines",
                self.output_scanline
            );
        }
        Ok(())
    }
}

/// Runs one complete decode of `jpeg` into the planes of `image`, with a freshly created
/// decompressor.
pub fn decode_into(jpeg: &[u8], image: &mut Image, method: DctMethod) -> Result<()> {
    let mut decompressor = Decompressor::new(jpeg)?;
    decompressor.read_header()?;
    decompressor.set_dct_method(method);
    decompressor.start()?;
    decompressor.read_image(image)?;
    decompressor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Hand-assembled 8x8 grayscale JPEG, every coefficient 0 except DC.
    fn tiny_gray(dc_diff_bits: &[u8]) -> Vec<u8> {
        let mut jpeg = vec![0xFF, 0xD8];
        // DQT: table 0, all ones.
        jpeg.extend([0xFF, 0xDB, 0x00, 0x43, 0x00]);
        jpeg.extend([1; 64]);
        // SOF0: 8 bits, 8x8, 1 component 1x1 using table 0.
        jpeg.extend([0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08, 0x01, 0x01, 0x11, 0x00]);
        // DHT DC 0: one 1-bit code `0` for category 8.
        jpeg.extend([0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01]);
        jpeg.extend([0; 15]);
        jpeg.push(0x08);
        // DHT AC 0: one 1-bit code `0` for EOB.
        jpeg.extend([0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01]);
        jpeg.extend([0; 15]);
        jpeg.push(0x00);
        // SOS
        jpeg.extend([0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);
        jpeg.extend(dc_diff_bits);
        jpeg.extend([0xFF, 0xD9]);
        jpeg
    }

    #[test]
    fn header() {
        // DC code `0`, 8 magnitude bits `1000_0000` (=128), EOB `0`, padding.
        let jpeg = tiny_gray(&[0b0100_0000, 0b0011_1111]);
        let mut d = Decompressor::new(&jpeg).unwrap();
        let frame = d.read_header().unwrap().clone();
        assert_eq!((frame.width, frame.height), (8, 8));
        assert_eq!(frame.components.len(), 1);
        assert_eq!(frame.components[0].width_in_blocks, 1);
        assert_eq!(frame.imcu_height(), 8);
        assert_eq!(frame.imcu_rows(), 1);
    }

    #[test]
    fn single_block() {
        let jpeg = tiny_gray(&[0b0100_0000, 0b0011_1111]);
        let mut d = Decompressor::new(&jpeg).unwrap();
        d.start().unwrap();

        let mut plane = [0; 64];
        let mut bands = [RowBand::new(&mut plane, 8)];
        assert_eq!(d.read_raw_data(&mut bands, 8).unwrap(), 8);
        assert_eq!(d.output_scanline(), 8);
        d.finish().unwrap();
        // DC 128 with q = 1 is a flat level of 128 / 8 = 16 above mid-gray.
        assert_eq!(plane, [144; 64]);

        // Reading more lines than the image has produces nothing.
        let mut bands = [RowBand::new(&mut plane, 8)];
        assert_eq!(d.read_raw_data(&mut bands, 8).unwrap(), 0);

        d.rewind().unwrap();
        assert_eq!(d.output_scanline(), 0);
        let mut again = [0; 64];
        let mut bands = [RowBand::new(&mut again, 8)];
        d.read_raw_data(&mut bands, 8).unwrap();
        assert_eq!(again, plane);
    }

    #[test]
    fn read_before_start() {
        let jpeg = tiny_gray(&[0b0100_0000, 0b0011_1111]);
        let mut d = Decompressor::new(&jpeg).unwrap();
        d.read_header().unwrap();

        let mut plane = [0; 64];
        let err = d
            .read_raw_data(&mut [RowBand::new(&mut plane, 8)], 8)
            .unwrap_err();
        assert_eq!(err.to_string(), "`read_raw_data` called before `start`");
        assert_eq!(d.output_scanline(), 0);
    }

    #[test]
    fn band_errors() {
        let jpeg = tiny_gray(&[0b0100_0000, 0b0011_1111]);
        let mut d = Decompressor::new(&jpeg).unwrap();
        d.start().unwrap();

        let mut plane = [0; 64];
        let err = d
            .read_raw_data(&mut [RowBand::new(&mut plane, 8)], 4)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "raw data buffer holds 4 lines, but an iMCU row has 8"
        );

        let err = d
            .read_raw_data(&mut [RowBand::new(&mut plane[..32], 8)], 8)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "raw data band of component 0 (4 rows of 8 samples) is too small for block (0, 0)"
        );

        let err = d.finish().unwrap_err();
        assert_eq!(
            err.to_string(),
            "decompression finished after 0 of 8 scanlines"
        );
    }

    #[test]
    fn rejects_progressive() {
        let mut jpeg = tiny_gray(&[0]);
        let sof = jpeg.windows(2).position(|w| w == [0xFF, 0xC0]).unwrap();
        jpeg[sof + 1] = 0xC2;
        let err = Decompressor::new(&jpeg)
            .unwrap()
            .read_header()
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(
            err.to_string(),
            "not a sequential Huffman-coded JPEG (SOF=SOF2)"
        );
    }

    #[test]
    fn rejects_12_bit() {
        let mut jpeg = tiny_gray(&[0]);
        let sof = jpeg.windows(2).position(|w| w == [0xFF, 0xC0]).unwrap();
        jpeg[sof + 4] = 12;
        let err = Decompressor::new(&jpeg)
            .unwrap()
            .read_header()
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn missing_scan() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xD9];
        let err = Decompressor::new(&jpeg)
            .unwrap()
            .read_header()
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
        assert_eq!(err.to_string(), "reached EOI before SOS marker (no image data)");
    }
}

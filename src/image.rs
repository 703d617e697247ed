//! Planar image descriptor and header analysis.

use std::{
    io,
    ops::{Deref, DerefMut},
};

use crate::{
    decode::{Decompressor, RowBand},
    error::{Error, ErrorKind, Result},
};

/// One component plane, stored at its native resolution.
#[derive(Debug, PartialEq, Eq)]
pub struct Plane {
    /// Block-aligned width in samples.
    pub width: u32,
    /// Block-aligned height in samples.
    pub height: u32,
    /// Distance between horizontally adjacent samples, in bytes.
    pub x_stride: usize,
    /// Distance between vertically adjacent samples, in bytes.
    pub y_stride: usize,
    /// The plane samples once per `1 << x_dec` samples of the most densely sampled plane.
    pub x_dec: u32,
    pub y_dec: u32,
    pub data: Vec<u8>,
}

impl Plane {
    /// Number of samples this plane contributes to throughput figures: its dimensions, each
    /// shifted right by the plane's decimation.
    pub fn samples(&self) -> u64 {
        u64::from(self.width >> self.x_dec) * u64::from(self.height >> self.y_dec)
    }

    /// Returns the sample at column `x`, row `y`.
    pub fn sample(&self, x: u32, y: u32) -> u8 {
        self.data[y as usize * self.y_stride + x as usize * self.x_stride]
    }
}

/// A planar YCbCr image whose plane buffers are allocated once and overwritten by every decode.
#[derive(Debug)]
pub struct Image {
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl Image {
    /// Reads the JPEG headers and allocates block-aligned planes for every component.
    ///
    /// Plane contents are zeroed until the first decode.
    pub fn from_jpeg(jpeg: &[u8]) -> Result<Self> {
        let mut decompressor = Decompressor::new(jpeg)?;
        let frame = decompressor.read_header()?;
        log::info!("read JPEG headers");
        log::info!("image size: {}x{}", frame.width, frame.height);

        if frame.components.len() != 3 {
            log::warn!(
                "image has {} components, only 3-component YCbCr images can be rendered",
                frame.components.len()
            );
        }

        let max_h = ilog(frame.max_h_samp.into());
        let max_v = ilog(frame.max_v_samp.into());
        let mut planes = Vec::with_capacity(frame.components.len());
        for (i, comp) in frame.components.iter().enumerate() {
            for (what, max, this) in [
                ("horizontal", frame.max_h_samp, comp.h_samp),
                ("vertical", frame.max_v_samp, comp.v_samp),
            ] {
                if max % this != 0 || !(max / this).is_power_of_two() {
                    return Err(Error::unsupported(format!(
                        "{what} sampling factor {this} of component {} is not a power-of-two fraction of {max}",
                        comp.id
                    )));
                }
            }

            let width = comp.width_in_blocks * 8;
            let height = comp.height_in_blocks * 8;
            let x_dec = max_h - ilog(comp.h_samp.into());
            let y_dec = max_v - ilog(comp.v_samp.into());
            log::info!("plane {i}: width = {width}, height = {height}, xdec = {x_dec}, ydec = {y_dec}");

            planes.push(Plane {
                width,
                height,
                x_stride: 1,
                y_stride: width as usize,
                x_dec,
                y_dec,
                data: alloc_zeroed(width as usize * height as usize)?,
            });
        }

        Ok(Self {
            width: frame.width,
            height: frame.height,
            planes,
        })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    #[inline]
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Sum of [`Plane::samples`] over all planes.
    pub fn total_samples(&self) -> u64 {
        self.planes.iter().map(Plane::samples).sum()
    }

    /// Returns, for each plane, the rows receiving the iMCU row that starts at image line
    /// `scanline` and spans `lines` image lines.
    ///
    /// Bands are clipped to the plane, so the last band of a plane may be shorter.
    pub fn bands(&mut self, scanline: u32, lines: u32) -> Bands<'_> {
        let mut bands = Bands::default();
        for (band, plane) in bands.bands.iter_mut().zip(&mut self.planes) {
            let height = plane.height as usize;
            let first = ((scanline >> plane.y_dec) as usize).min(height);
            let last = (first + (lines >> plane.y_dec) as usize).min(height);
            let data = &mut plane.data[first * plane.y_stride..last * plane.y_stride];
            *band = RowBand::new(data, plane.y_stride);
            bands.len += 1;
        }
        bands
    }

    /// Writes every plane's samples as rows of decimal values, each followed by a space.
    pub fn dump(&self, mut out: impl io::Write) -> Result<()> {
        for (i, plane) in self.planes.iter().enumerate() {
            writeln!(out, "plane {i} ({}x{}):", plane.width, plane.height)?;
            for row in plane.data.chunks_exact(plane.y_stride) {
                for sample in row {
                    write!(out, "{sample} ")?;
                }
                out.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

/// The [`RowBand`]s of one iMCU row, one per plane.
#[derive(Default)]
pub struct Bands<'a> {
    bands: [RowBand<'a>; 4],
    len: usize,
}

impl<'a> Deref for Bands<'a> {
    type Target = [RowBand<'a>];

    fn deref(&self) -> &Self::Target {
        &self.bands[..self.len]
    }
}

impl<'a> DerefMut for Bands<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.bands[..self.len]
    }
}

fn alloc_zeroed(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| {
        Error::new(
            ErrorKind::OutOfMemory,
            format!("could not allocate {len} bytes"),
        )
    })?;
    data.resize(len, 0);
    Ok(data)
}

/// Position of the highest set bit plus one (`ilog(0) = 0`, `ilog(2^k) = k + 1`).
pub fn ilog(v: u32) -> u32 {
    u32::BITS - v.leading_zeros()
}

#[cfg(test)]
mod tests {
    use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

    use super::*;

    fn encode(width: u16, height: u16, color: ColorType, sampling: SamplingFactor) -> Vec<u8> {
        let channels = match color {
            ColorType::Luma => 1,
            _ => 3,
        };
        let mut jpeg = Vec::new();
        let mut enc = Encoder::new(&mut jpeg, 90);
        enc.set_sampling_factor(sampling);
        enc.encode(
            &vec![0x80; usize::from(width) * usize::from(height) * channels],
            width,
            height,
            color,
        )
        .unwrap();
        jpeg
    }

    fn check_invariants(image: &Image) {
        let luma = &image.planes()[0];
        assert_eq!((luma.x_dec, luma.y_dec), (0, 0));
        for plane in image.planes() {
            assert!(plane.width > 0 && plane.width % 8 == 0);
            assert!(plane.height > 0 && plane.height % 8 == 0);
            assert_eq!(plane.data.len(), (plane.width * plane.height) as usize);
            assert!(luma.width >> plane.x_dec <= plane.width);
            assert!(luma.height >> plane.y_dec <= plane.height);
            // The visible image maps onto real samples of every plane.
            assert!((image.width() - 1) >> plane.x_dec < plane.width);
            assert!((image.height() - 1) >> plane.y_dec < plane.height);
        }
    }

    #[test]
    fn ilog_values() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(4), 3);
        assert_eq!(ilog(1 << 31), 32);
    }

    #[test]
    fn geometry_420() {
        let image = Image::from_jpeg(&encode(640, 480, ColorType::Ycbcr, SamplingFactor::F_2_2))
            .unwrap();
        let planes = image
            .planes()
            .iter()
            .map(|p| (p.width, p.height, p.x_dec, p.y_dec))
            .collect::<Vec<_>>();
        assert_eq!(planes, [(640, 480, 0, 0), (320, 240, 1, 1), (320, 240, 1, 1)]);
        for plane in image.planes() {
            assert_eq!(image.planes()[0].width >> plane.x_dec, plane.width);
            assert_eq!(image.planes()[0].height >> plane.y_dec, plane.height);
        }
        assert_eq!(image.total_samples(), 640 * 480 + 2 * 160 * 120);
        check_invariants(&image);
    }

    #[test]
    fn geometry_odd_size() {
        let image =
            Image::from_jpeg(&encode(17, 17, ColorType::Ycbcr, SamplingFactor::F_2_2)).unwrap();
        let planes = image
            .planes()
            .iter()
            .map(|p| (p.width, p.height, p.x_dec, p.y_dec))
            .collect::<Vec<_>>();
        assert_eq!(planes, [(24, 24, 0, 0), (16, 16, 1, 1), (16, 16, 1, 1)]);
        assert_eq!(image.total_samples(), 24 * 24 + 2 * 8 * 8);
        check_invariants(&image);
    }

    #[test]
    fn geometry_444_and_gray() {
        let image =
            Image::from_jpeg(&encode(24, 8, ColorType::Ycbcr, SamplingFactor::F_1_1)).unwrap();
        for plane in image.planes() {
            assert_eq!((plane.width, plane.height, plane.x_dec, plane.y_dec), (24, 8, 0, 0));
        }
        check_invariants(&image);

        let image =
            Image::from_jpeg(&encode(9, 9, ColorType::Luma, SamplingFactor::F_1_1)).unwrap();
        assert_eq!(image.plane_count(), 1);
        assert_eq!((image.planes()[0].width, image.planes()[0].height), (16, 16));
    }

    #[test]
    fn bands_are_clipped() {
        let mut image =
            Image::from_jpeg(&encode(17, 17, ColorType::Ycbcr, SamplingFactor::F_2_2)).unwrap();
        fn rows(bands: Bands<'_>) -> Vec<usize> {
            bands.iter().map(RowBand::rows).collect()
        }
        assert_eq!(rows(image.bands(0, 16)), [16, 8, 8]);
        assert_eq!(rows(image.bands(16, 16)), [8, 8, 8]);
        assert_eq!(rows(image.bands(32, 16)), [0, 0, 0]);
    }

    #[test]
    fn dump() {
        let mut image =
            Image::from_jpeg(&encode(8, 8, ColorType::Luma, SamplingFactor::F_1_1)).unwrap();
        image.planes[0].data[..8].copy_from_slice(&[0, 1, 2, 0x10, 0x7f, 0x80, 0xfe, 0xff]);
        let mut out = Vec::new();
        image.dump(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines = out.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "plane 0 (8x8):");
        assert_eq!(lines[1], "0 1 2 16 127 128 254 255 ");
        assert_eq!(lines[2], "0 0 0 0 0 0 0 0 ");
    }

    #[test]
    fn not_a_jpeg() {
        let err = Image::from_jpeg(b"GIF89a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }
}

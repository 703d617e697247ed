//! Hybrid JPEG decoding: raw planar YCbCr decode on the CPU, color conversion and chroma
//! upsampling in a fragment shader.
//!
//! [`Image::from_jpeg`] reads the JPEG headers and allocates one block-aligned plane per
//! component. [`decode_into`] (or a reused [`Decompressor`]) fills the planes with samples at
//! each component's native resolution, and a [`Renderer`] uploads them as `R8Uint` textures and
//! converts them to RGB with BT.601 coefficients.

mod bits;
mod cli;
mod decode;
mod error;
mod file;
mod huffman;
mod idct;
mod image;
mod metadata;
mod render;
mod timer;


pub use cli::{usage, Options, UsageRequest};
pub use decode::{decode_into, ComponentInfo, Decompressor, FrameInfo, RowBand};
pub use error::{Error, ErrorKind, Result};
pub use idct::DctMethod;
pub use image::{ilog, Bands, Image, Plane};
pub use render::{Gpu, Renderer};
pub use timer::{FrameReport, FrameTimer};

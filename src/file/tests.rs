use std::fmt::Write;

use expect_test::{expect, Expect};
use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

use super::{Marker, SegmentReader};

fn dump(jpeg: &[u8]) -> String {
    fn dump_impl(jpeg: &[u8], out: &mut String) -> crate::Result<()> {
        let mut segments = SegmentReader::new(jpeg)?;
        while let Some(segment) = segments.next_segment()? {
            writeln!(out, "{segment}").unwrap();
        }
        Ok(())
    }

    let mut out = String::new();
    if let Err(e) = dump_impl(jpeg, &mut out) {
        writeln!(out, "error: {e}").unwrap();
    }
    out
}

fn check(jpeg: &[u8], expect: Expect) {
    expect.assert_eq(&dump(jpeg));
}

fn markers(jpeg: &[u8]) -> Vec<Marker> {
    let mut segments = SegmentReader::new(jpeg).unwrap();
    let mut markers = Vec::new();
    while let Some(segment) = segments.next_segment().unwrap() {
        markers.push(segment.marker);
    }
    markers
}

/// Wraps `payload` in a segment with the given marker code.
fn segment(code: u8, payload: &[u8]) -> Vec<u8> {
    let len = u16::try_from(payload.len() + 2).unwrap();
    let mut out = vec![0xFF, code];
    out.extend(len.to_be_bytes());
    out.extend(payload);
    out
}

fn stream(segments: &[Vec<u8>]) -> Vec<u8> {
    let mut jpeg = vec![0xFF, 0xD8];
    jpeg.extend(segments.concat());
    jpeg.extend([0xFF, 0xD9]);
    jpeg
}

#[test]
fn empty() {
    check(
        &[0xFF],
        expect![[r#"
            error: reached end of data while decoding JPEG stream
        "#]],
    );
    check(
        &[0xFF, 0xD8 /* SOI */],
        expect![[r#"
            error: reached end of data while decoding JPEG stream
        "#]],
    );
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xD9, // EOI
        ],
        expect![[""]],
    );
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xD9, // EOI
            0xFF, // trailing
        ],
        expect![[""]],
    );
}

#[test]
fn not_a_jpeg() {
    check(
        &[0x89, b'P', b'N', b'G'],
        expect![[r#"
            error: JPEG image does not start with SOI marker
        "#]],
    );
}

#[test]
fn skipped_segments() {
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, // APP0
            0x00, 0x04, // 2 more bytes after this
            0x00, 0x00, // APP0 contents
            0xFF, 0xDD, // DRI
            0x00, 0x04, // length
            0x00, 0x0F, // Ri
            0xFF, 0xD9, // EOI
        ],
        expect![[r#"
            0002 APP0 2 bytes skipped
            0008 DRI interval 15
        "#]],
    );
}

#[test]
fn fill_bytes() {
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xFF, 0xFF, 0xDD, // DRI, with fill bytes
            0x00, 0x04, 0x00, 0x01, // length, Ri
            0xFF, 0xD9, // EOI
        ],
        expect![[r#"
            0004 DRI interval 1
        "#]],
    );
}

#[test]
fn invalid_markers() {
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xDB, // DQT
            0x00, 0x01, // length
        ],
        expect![[r#"
            error: invalid segment length 1
        "#]],
    );
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xDB, // DQT
            0x00, 0x10, 0x00, // truncated
        ],
        expect![[r#"
            error: reached end of data while decoding JPEG stream
        "#]],
    );
    check(
        &[0xFF, 0xD8, 0xFF, 0x00],
        expect![[r#"
            error: invalid ff 00 marker
        "#]],
    );
    check(
        &[0xFF, 0xD8, 0xFF, 0xD0],
        expect![[r#"
            error: unexpected RST0 marker outside of scan data
        "#]],
    );
}

#[test]
fn marker_names() {
    let names = [0xC0, 0xC2, 0xC4, 0xC8, 0xD3, 0xDA, 0xE1, 0xEE, 0xFE]
        .map(|code| Marker(code).to_string());
    assert_eq!(
        names,
        ["SOF0", "SOF2", "DHT", "FF C8", "RST3", "SOS", "APP1", "APP14", "COM"]
    );
}

#[test]
fn tables() {
    let mut dqt = vec![0x00];
    dqt.extend([1; 64]);
    dqt.push(0x11);
    dqt.extend([0x01; 128]);

    let mut dht = vec![0x00, 0x00, 0x02];
    dht.extend([0; 14]);
    dht.extend([3, 4]);
    dht.push(0x13);
    dht.push(0x01);
    dht.extend([0; 15]);
    dht.push(0x00);

    let jpeg = stream(&[segment(0xDB, &dqt), segment(0xC4, &dht)]);
    check(
        &jpeg,
        expect![[r#"
            0002 DQT tables 0:8-bit 1:16-bit
            00C8 DHT tables dc0:2 ac3:1
        "#]],
    );

    let mut segments = SegmentReader::new(&jpeg).unwrap();
    let Some(super::Segment {
        body: super::Body::Quantization(qt),
        ..
    }) = segments.next_segment().unwrap()
    else {
        panic!("expected DQT");
    };
    assert_eq!(qt[0].values, [1; 64]);
    assert_eq!(qt[1].values, [0x0101; 64]);
}

#[test]
fn frame_header() {
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xC0, // SOF0
            0x00, 0x11, // length
            0x08, // P
            0x00, 0x10, // Y
            0x00, 0x20, // X
            0x03, // Nf
            0x01, 0x22, 0x00, // Y: 2x2, table 0
            0x02, 0x11, 0x01, // Cb: 1x1, table 1
            0x03, 0x11, 0x01, // Cr: 1x1, table 1
            0xFF, 0xD9, // EOI
        ],
        expect![[r#"
            0002 SOF0 8-bit 32x16 1:2x2/q0 2:1x1/q1 3:1x1/q1
        "#]],
    );
}

#[test]
fn scan_data_includes_stuffing_and_rst() {
    check(
        &[
            0xFF, 0xD8, // SOI
            0xFF, 0xDA, // SOS
            0x00, 0x08, // length
            0x01, // Ns
            0x01, 0x00, // component 1, tables 0/0
            0x00, 0x3F, 0x00, // Ss, Se, AhAl
            0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD0, 0x56, // scan data
            0xFF, 0xD9, // EOI
        ],
        expect![[r#"
            0002 SOS 1:dc0/ac0 Ss=0 Se=63 Ah=0 Al=0, 7 bytes
        "#]],
    );
}

#[test]
fn encoder_output() {
    let (width, height) = (32, 16);
    let mut jpeg = Vec::new();
    let mut enc = Encoder::new(&mut jpeg, 90);
    enc.set_sampling_factor(SamplingFactor::F_2_2);
    enc.set_restart_interval(1);
    enc.encode(
        &vec![0x80; width * height * 3],
        width as u16,
        height as u16,
        ColorType::Ycbcr,
    )
    .unwrap();

    let markers = markers(&jpeg);
    for required in [Marker::DQT, Marker::DHT, Marker::SOF0, Marker::DRI, Marker::SOS] {
        assert!(
            markers.contains(&required),
            "missing {required} in {markers:?}"
        );
    }
    // The scan is the last segment, and swallows all RST markers.
    assert_eq!(markers.last(), Some(&Marker::SOS));
}

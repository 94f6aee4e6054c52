use std::io::Write;
use tickboy_core::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Encode a 0x00RRGGBB framebuffer as an 8-bit RGB PNG.
pub fn write_png(out: impl Write, frame: &[u32]) -> Result<(), png::EncodingError> {
    let mut rgb = Vec::with_capacity(frame.len() * 3);
    for px in frame {
        rgb.extend_from_slice(&[(px >> 16) as u8, (px >> 8) as u8, *px as u8]);
    }
    let mut encoder = png::Encoder::new(out, SCREEN_WIDTH as u32, SCREEN_HEIGHT as u32);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgb)?;
    writer.finish()
}

/// Printable form of guest serial output.
pub fn escape_serial(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' || b == b'\n' {
            text.push(b as char);
        } else {
            text.push_str(&format!("\\x{b:02X}"));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_decodes_back_to_the_frame() {
        let mut frame = vec![0u32; SCREEN_WIDTH * SCREEN_HEIGHT];
        frame[0] = 0x00123456;
        frame[SCREEN_WIDTH * SCREEN_HEIGHT - 1] = 0x00E0F8D0;
        let mut out = Vec::new();
        write_png(&mut out, &frame).unwrap();

        let decoder = png::Decoder::new(std::io::Cursor::new(&out[..]));
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; SCREEN_WIDTH * SCREEN_HEIGHT * 3];
        let info = reader.next_frame(&mut buf).unwrap();
        assert_eq!((info.width, info.height), (160, 144));
        assert_eq!(info.color_type, png::ColorType::Rgb);
        assert_eq!(info.bit_depth, png::BitDepth::Eight);
        assert_eq!(&buf[..3], &[0x12, 0x34, 0x56]);
        assert_eq!(&buf[buf.len() - 3..], &[0xE0, 0xF8, 0xD0]);
    }

    #[test]
    fn serial_escapes_control_bytes() {
        assert_eq!(escape_serial(b"ok 1\n"), "ok 1\n");
        assert_eq!(escape_serial(&[0x00, b'A', 0xFF]), "\\x00A\\xFF");
    }
}

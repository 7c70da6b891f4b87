use crate::{PixfxError, PixfxResult};

/// A CPU-side working surface: RGBA8 samples, row-major, straight
/// (non-premultiplied) alpha.
///
/// Invariant: `data.len() == width * height * 4`. Constructors enforce it;
/// code that swaps `data` wholesale must re-establish it.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a transparent-black buffer of the given dimensions.
    pub fn new(width: u32, height: u32) -> PixfxResult<Self> {
        let len = byte_len(width, height)?;
        Ok(Self {
            width,
            height,
            data: vec![0u8; len],
        })
    }

    /// Wrap existing RGBA8 bytes, checking the size invariant.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> PixfxResult<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(PixfxError::validation(
                "pixel buffer expects data matching width*height*4",
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A buffer filled with one RGBA color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> PixfxResult<Self> {
        let len = byte_len(width, height)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / 4 {
            data.extend_from_slice(&rgba);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) as usize) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = ((y * self.width + x) as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }
}

fn byte_len(width: u32, height: u32) -> PixfxResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(4))
        .ok_or_else(|| PixfxError::validation("pixel buffer size overflow"))
}

/// Parse a `#RGB`, `#RRGGBB` or `#RRGGBBAA` color string into RGBA8.
pub fn parse_hex_color(s: &str) -> PixfxResult<[u8; 4]> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    let bad = || PixfxError::validation(format!("invalid color '{s}'"));

    let nib = |c: u8| -> PixfxResult<u8> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(bad()),
        }
    };
    let byte = |hi: u8, lo: u8| -> PixfxResult<u8> { Ok(nib(hi)? << 4 | nib(lo)?) };

    let b = hex.as_bytes();
    match b.len() {
        3 => Ok([
            nib(b[0])? * 17,
            nib(b[1])? * 17,
            nib(b[2])? * 17,
            255,
        ]),
        6 => Ok([
            byte(b[0], b[1])?,
            byte(b[2], b[3])?,
            byte(b[4], b[5])?,
            255,
        ]),
        8 => Ok([
            byte(b[0], b[1])?,
            byte(b[2], b[3])?,
            byte(b[4], b[5])?,
            byte(b[6], b[7])?,
        ]),
        _ => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgba8_rejects_wrong_length() {
        assert!(PixelBuffer::from_rgba8(2, 2, vec![0u8; 15]).is_err());
        assert!(PixelBuffer::from_rgba8(2, 2, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn solid_fills_every_pixel() {
        let buf = PixelBuffer::solid(3, 2, [1, 2, 3, 4]).unwrap();
        for px in buf.data.chunks_exact(4) {
            assert_eq!(px, &[1, 2, 3, 4]);
        }
    }

    #[test]
    fn pixel_roundtrip() {
        let mut buf = PixelBuffer::new(4, 4).unwrap();
        buf.set_pixel(2, 3, [9, 8, 7, 6]);
        assert_eq!(buf.pixel(2, 3), [9, 8, 7, 6]);
    }

    #[test]
    fn hex_color_forms() {
        assert_eq!(parse_hex_color("#fff").unwrap(), [255, 255, 255, 255]);
        assert_eq!(parse_hex_color("#FF0000").unwrap(), [255, 0, 0, 255]);
        assert_eq!(parse_hex_color("00ff0080").unwrap(), [0, 255, 0, 128]);
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("#gggggg").is_err());
    }
}

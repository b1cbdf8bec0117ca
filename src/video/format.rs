//! Pixel format handling. This server only ever negotiates compressed
//! MJPEG/JPEG capture formats; it never decodes or transcodes frames.

use v4l::format::FourCC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Mjpeg,
    Jpeg,
}

impl PixelFormat {
    pub fn to_fourcc(self) -> FourCC {
        match self {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Jpeg => FourCC::new(b"JPEG"),
        }
    }

    pub fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"MJPG" => Some(PixelFormat::Mjpeg),
            b"JPEG" => Some(PixelFormat::Jpeg),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_fourcc() {
        for fmt in [PixelFormat::Mjpeg, PixelFormat::Jpeg] {
            let fourcc = fmt.to_fourcc();
            assert_eq!(PixelFormat::from_fourcc(&fourcc), Some(fmt));
        }
    }

    #[test]
    fn unknown_fourcc_is_none() {
        let fourcc = FourCC::new(b"YUYV");
        assert_eq!(PixelFormat::from_fourcc(&fourcc), None);
    }
}

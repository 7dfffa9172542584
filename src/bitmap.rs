//! Image to engraver bitmap conversion.
//!
//! The engraver expects one bit per pixel, row-major with MSB-first
//! packing: 1 engraves, 0 skips. An image {width: 24px, height: 4px} with
//! the left half black therefore packs each row as `ff:f0:00`.

use crate::error::{GraverError, GraverResult};

/// A single pixel sample, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Pixel source for engraving.
///
/// Image file decoding is a collaborator concern; the library only needs
/// bounds and per-pixel sampling. Implemented for `image::DynamicImage`
/// out of the box.
pub trait PixelGrid {
    /// Image width in pixels.
    fn width(&self) -> u32;

    /// Image height in pixels.
    fn height(&self) -> u32;

    /// Sample the pixel at (x, y). Both coordinates are within bounds.
    fn pixel(&self, x: u32, y: u32) -> Rgba;
}

impl PixelGrid for image::DynamicImage {
    fn width(&self) -> u32 {
        image::GenericImageView::width(self)
    }

    fn height(&self) -> u32 {
        image::GenericImageView::height(self)
    }

    fn pixel(&self, x: u32, y: u32) -> Rgba {
        let image::Rgba([r, g, b, a]) = image::GenericImageView::get_pixel(self, x, y);
        Rgba { r, g, b, a }
    }
}

/// Bytes per bitmap row for a given image width.
pub fn stride_for_width(width: u32) -> u32 {
    width.div_ceil(8)
}

/// A packed 1-bit-per-pixel bitmap, built for a single engrave transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    stride: u32,
    data: Vec<u8>,
}

impl Bitmap {
    /// Pack a pixel grid into the engraver's bitmap format.
    ///
    /// A pixel is marked for engraving iff `(r & g & b) < 255`, i.e. any
    /// channel strictly darker than pure white. Alpha is ignored. Bit
    /// position within a byte is MSB-first (`bit = 7 - (x % 8)`).
    pub fn render(image: &dyn PixelGrid) -> Self {
        let width = image.width();
        let height = image.height();
        let stride = stride_for_width(width);

        let mut data = vec![0u8; (stride * height) as usize];

        for y in 0..height {
            for x in 0..width {
                let Rgba { r, g, b, .. } = image.pixel(x, y);
                if (r & g & b) < 255 {
                    let index = (y * stride + x / 8) as usize;
                    data[index] |= 128 >> (x % 8);
                }
            }
        }

        Self {
            width,
            height,
            stride,
            data,
        }
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Width as transmitted to the device: the byte-rounded `stride * 8`,
    /// up to 7 pixels wider than the true image width.
    pub fn padded_width(&self) -> u32 {
        self.stride * 8
    }

    /// The packed bytes, `stride * height` long, uploaded as one raw write.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Reject images larger than the engravable area.
pub fn check_bounds(
    width: u32,
    height: u32,
    max_width: u16,
    max_height: u16,
) -> GraverResult<()> {
    if width > u32::from(max_width) || height > u32::from(max_height) {
        return Err(GraverError::ImageTooLarge {
            width,
            height,
            max_width,
            max_height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pixel grid backed by a closure, for exercising the packer without
    /// decoding any image file.
    struct FnGrid<F: Fn(u32, u32) -> Rgba> {
        width: u32,
        height: u32,
        sample: F,
    }

    impl<F: Fn(u32, u32) -> Rgba> PixelGrid for FnGrid<F> {
        fn width(&self) -> u32 {
            self.width
        }

        fn height(&self) -> u32 {
            self.height
        }

        fn pixel(&self, x: u32, y: u32) -> Rgba {
            (self.sample)(x, y)
        }
    }

    const BLACK: Rgba = Rgba {
        r: 0,
        g: 0,
        b: 0,
        a: 255,
    };
    const WHITE: Rgba = Rgba {
        r: 255,
        g: 255,
        b: 255,
        a: 255,
    };

    #[test]
    fn test_stride_rounds_up_to_whole_bytes() {
        assert_eq!(stride_for_width(1), 1);
        assert_eq!(stride_for_width(8), 1);
        assert_eq!(stride_for_width(9), 2);
        assert_eq!(stride_for_width(16), 2);
        assert_eq!(stride_for_width(17), 3);
        assert_eq!(stride_for_width(490), 62);
    }

    #[test]
    fn test_half_black_rows_pack_as_ff_f0_00() {
        let grid = FnGrid {
            width: 24,
            height: 4,
            sample: |x, _| if x < 12 { BLACK } else { WHITE },
        };

        let bitmap = Bitmap::render(&grid);
        assert_eq!(bitmap.stride(), 3);
        assert_eq!(bitmap.data().len(), 12);
        for row in bitmap.data().chunks(3) {
            assert_eq!(row, &[0xFF, 0xF0, 0x00]);
        }
    }

    #[test]
    fn test_bit_position_is_msb_first() {
        // Single marked pixel at x=0 must land in the high bit.
        let grid = FnGrid {
            width: 8,
            height: 1,
            sample: |x, _| if x == 0 { BLACK } else { WHITE },
        };
        assert_eq!(Bitmap::render(&grid).data(), &[0b1000_0000]);

        let grid = FnGrid {
            width: 8,
            height: 1,
            sample: |x, _| if x == 7 { BLACK } else { WHITE },
        };
        assert_eq!(Bitmap::render(&grid).data(), &[0b0000_0001]);
    }

    #[test]
    fn test_any_darkened_channel_marks_ink() {
        // 254 in a single channel is enough.
        let almost_white = Rgba {
            r: 254,
            g: 255,
            b: 255,
            a: 255,
        };
        let grid = FnGrid {
            width: 1,
            height: 1,
            sample: move |_, _| almost_white,
        };
        assert_eq!(Bitmap::render(&grid).data(), &[0b1000_0000]);

        // Pure white stays blank regardless of alpha.
        let transparent_white = Rgba {
            r: 255,
            g: 255,
            b: 255,
            a: 0,
        };
        let grid = FnGrid {
            width: 1,
            height: 1,
            sample: move |_, _| transparent_white,
        };
        assert_eq!(Bitmap::render(&grid).data(), &[0]);
    }

    #[test]
    fn test_rows_do_not_bleed_into_each_other() {
        // Width 9 -> stride 2, second byte of each row only uses its top bit.
        let grid = FnGrid {
            width: 9,
            height: 2,
            sample: |_, y| if y == 0 { BLACK } else { WHITE },
        };
        let bitmap = Bitmap::render(&grid);
        assert_eq!(bitmap.padded_width(), 16);
        assert_eq!(bitmap.data(), &[0xFF, 0b1000_0000, 0x00, 0x00]);
    }

    #[test]
    fn test_dynamic_image_adapter() {
        let mut img = image::RgbaImage::from_pixel(2, 1, image::Rgba([255, 255, 255, 255]));
        img.put_pixel(0, 0, image::Rgba([0, 0, 0, 255]));
        let dynamic = image::DynamicImage::ImageRgba8(img);

        assert_eq!(PixelGrid::width(&dynamic), 2);
        assert_eq!(PixelGrid::height(&dynamic), 1);
        assert_eq!(
            dynamic.pixel(0, 0),
            Rgba {
                r: 0,
                g: 0,
                b: 0,
                a: 255
            }
        );
        assert_eq!(Bitmap::render(&dynamic).data(), &[0b1000_0000]);
    }

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(490, 490, 490, 490).is_ok());
        assert!(check_bounds(491, 10, 490, 490).is_err());
        assert!(check_bounds(10, 491, 490, 490).is_err());
        let err = check_bounds(600, 700, 550, 550).unwrap_err();
        assert!(err.is_validation());
    }
}

//! Plate conditioning: turn a cropped plate region into a two level image
//! that text recognizers read reliably.
//!
//! The steps run in a fixed order, each feeding the next:
//! grayscale, upscale to a legible minimum, CLAHE, 3x3 gaussian, Otsu.

use image::{ DynamicImage, GenericImageView, GrayImage, Luma, imageops::{ self, FilterType } };
use imageproc::contrast::{ self, ThresholdType };
use imageproc::filter;
use tracing::debug;

use crate::error::LprError;

pub const MIN_WIDTH: u32 = 200;
pub const MIN_HEIGHT: u32 = 40;
pub const CLIP_LIMIT: f32 = 2.0;
pub const TILE_GRID: (u32, u32) = (8, 8);
/// Largest conditioned image, in pixels. Thin regions that would upscale past
/// it are rejected.
pub const MAX_PIXELS: u64 = 4_000_000;

const GAUSSIAN_3X3: [f32; 3] = [0.25, 0.5, 0.25];

/// Single channel image holding only `0` and `255`.
#[derive(Debug, Clone)]
pub struct ConditionedImage {
    image: GrayImage,
    otsu_level: u8,
    scale: f64,
}

impl ConditionedImage {

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Threshold picked for this image; pixels above it became white.
    pub fn otsu_level(&self) -> u8 {
        self.otsu_level
    }

    /// Upscaling factor applied before enhancement, 1.0 when none.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        DynamicImage::ImageLuma8(self.image.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageConditioner {
    min_width: u32,
    min_height: u32,
    clip_limit: f32,
    tile_grid: (u32, u32),
}

impl Default for ImageConditioner {
    fn default() -> Self {
        Self {
            min_width: MIN_WIDTH,
            min_height: MIN_HEIGHT,
            clip_limit: CLIP_LIMIT,
            tile_grid: TILE_GRID,
        }
    }
}

impl ImageConditioner {

    pub fn new() -> Self {
        Self::default()
    }

    pub fn condition(&self, region: &DynamicImage) -> Result<ConditionedImage, LprError> {
        let (width, height) = region.dimensions();
        if width == 0 || height == 0 {
            return Err(LprError::invalid_region(format!("region is {}x{}", width, height)));
        }

        let scale = self.upscale_factor(width, height);
        let (new_width, new_height) = if scale > 1.0 {
            ((width as f64 * scale).round() as u32, (height as f64 * scale).round() as u32)
        } else {
            (width, height)
        };
        if new_width as u64 * new_height as u64 > MAX_PIXELS {
            return Err(LprError::invalid_region(format!(
                "{}x{} region would condition to {}x{}, over {} pixels", width, height, new_width, new_height, MAX_PIXELS
            )));
        }

        let gray = region.to_luma8();
        let gray = if scale > 1.0 {
            imageops::resize(&gray, new_width, new_height, FilterType::CatmullRom)
        } else {
            gray
        };

        let enhanced = clahe(&gray, self.clip_limit, self.tile_grid);
        let blurred = gaussian_blur_3x3(&enhanced);
        let otsu_level = contrast::otsu_level(&blurred);
        let image = binarize(&blurred, otsu_level);

        debug!(width, height, scale, otsu_level, "conditioned plate region");
        Ok(ConditionedImage { image, otsu_level, scale })
    }

    /// Factor that lifts both sides to at least the minimum size. Never below 1.
    pub fn upscale_factor(&self, width: u32, height: u32) -> f64 {
        if width >= self.min_width && height >= self.min_height {
            return 1.0;
        }
        let by_width = self.min_width as f64 / width as f64;
        let by_height = self.min_height as f64 / height as f64;
        by_width.max(by_height).max(1.0)
    }
}

/// Contrast limited adaptive histogram equalization.
///
/// The image is split into `tiles.0 x tiles.1` tiles (the grid covers the image
/// padded up to a multiple of the tile size, padding mirrors the border without
/// repeating the edge pixel). Each tile gets a clipped, redistributed histogram
/// and its own lookup table; pixels are mapped by bilinear interpolation between
/// the four nearest tile tables.
pub fn clahe(img: &GrayImage, clip_limit: f32, tiles: (u32, u32)) -> GrayImage {
    let (width, height) = img.dimensions();
    let (tiles_x, tiles_y) = (tiles.0.max(1), tiles.1.max(1));
    if width == 0 || height == 0 {
        return img.clone();
    }
    let tile_width = (width + tiles_x - 1) / tiles_x;
    let tile_height = (height + tiles_y - 1) / tiles_y;
    let tile_area = tile_width * tile_height;

    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / 256.0) as u32).max(1)
    } else {
        u32::MAX
    };
    let lut_scale = 255.0 / tile_area as f32;

    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; 256];
            for y in ty * tile_height..(ty + 1) * tile_height {
                let sy = reflect_101(y as i64, height);
                for x in tx * tile_width..(tx + 1) * tile_width {
                    let sx = reflect_101(x as i64, width);
                    hist[img.get_pixel(sx, sy)[0] as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut sum = 0u32;
            for (value, count) in hist.iter().enumerate() {
                sum += count;
                lut[value] = (sum as f32 * lut_scale).round().min(255.0) as u8;
            }
        }
    }

    let inv_tile_width = 1.0 / tile_width as f32;
    let inv_tile_height = 1.0 / tile_height as f32;
    GrayImage::from_fn(width, height, |x, y| {
        let tyf = y as f32 * inv_tile_height - 0.5;
        let ty1 = tyf.floor() as i64;
        let ya = tyf - ty1 as f32;
        let ty2 = (ty1 + 1).min(tiles_y as i64 - 1) as u32;
        let ty1 = ty1.max(0) as u32;

        let txf = x as f32 * inv_tile_width - 0.5;
        let tx1 = txf.floor() as i64;
        let xa = txf - tx1 as f32;
        let tx2 = (tx1 + 1).min(tiles_x as i64 - 1) as u32;
        let tx1 = tx1.max(0) as u32;

        let value = img.get_pixel(x, y)[0] as usize;
        let lut = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = lut(tx1, ty1) * (1.0 - xa) + lut(tx2, ty1) * xa;
        let bottom = lut(tx1, ty2) * (1.0 - xa) + lut(tx2, ty2) * xa;
        let mapped = top * (1.0 - ya) + bottom * ya;
        Luma([mapped.round().clamp(0.0, 255.0) as u8])
    })
}

// Clip every bin at `clip` and spread the excess evenly, leftovers go to
// evenly spaced bins starting at 0.
fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut clipped = 0u32;
    for count in hist.iter_mut() {
        if *count > clip {
            clipped += *count - clip;
            *count = clip;
        }
    }
    let batch = clipped / 256;
    let mut residual = clipped - batch * 256;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        let mut index = 0;
        while index < 256 && residual > 0 {
            hist[index] += 1;
            index += step;
            residual -= 1;
        }
    }
}

/// 3x3 gaussian with the fixed `[1 2 1] / 4` kernel in both directions.
pub fn gaussian_blur_3x3(img: &GrayImage) -> GrayImage {
    filter::separable_filter_equal(img, &GAUSSIAN_3X3)
}

/// Strict two level threshold: above `level` is white, the rest black.
pub fn binarize(img: &GrayImage, level: u8) -> GrayImage {
    contrast::threshold(img, level, ThresholdType::Binary)
}

// Mirror index `i` into `0..len`, edge pixel not repeated (`dcb|abcd|cba`).
fn reflect_101(i: i64, len: u32) -> u32 {
    if len <= 1 {
        return 0;
    }
    let n = len as i64;
    let period = 2 * (n - 1);
    let m = i.rem_euclid(period);
    (if m < n { m } else { period - m }) as u32
}


#[cfg(test)]
mod test {

    use image::{ DynamicImage, GrayImage, Luma, Rgb, RgbImage };

    use std::collections::BTreeSet;
    use std::error::Error;

    use super::*;
    use crate::error::LprErrorKind;

    fn distinct(img: &GrayImage) -> BTreeSet<u8> {
        img.pixels().map(|p| p[0]).collect()
    }

    // dark vertical strokes on a light background
    fn fake_plate(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let stroke = (x / 6) % 2 == 0 && y > height / 5 && y < height * 4 / 5;
            if stroke { Rgb([30, 35, 40]) } else { Rgb([210, 215, 205]) }
        })
    }

    #[test]
    fn upscale_factor_only_grows() {
        let conditioner = ImageConditioner::new();
        assert_eq!(conditioner.upscale_factor(100, 20), 2.0);
        assert_eq!(conditioner.upscale_factor(50, 40), 4.0);
        assert_eq!(conditioner.upscale_factor(400, 20), 2.0);
        assert_eq!(conditioner.upscale_factor(300, 60), 1.0);
        assert_eq!(conditioner.upscale_factor(200, 40), 1.0);
    }

    #[test]
    fn small_region_is_upscaled_to_minimum() -> Result<(), Box<dyn Error>> {
        let conditioner = ImageConditioner::new();
        let out = conditioner.condition(&DynamicImage::ImageRgb8(fake_plate(100, 20)))?;
        assert_eq!(out.dimensions(), (200, 40));
        assert_eq!(out.scale(), 2.0);

        let out = conditioner.condition(&DynamicImage::ImageRgb8(fake_plate(120, 30)))?;
        assert_eq!(out.dimensions(), (200, 50));
        Ok(())
    }

    #[test]
    fn large_region_keeps_its_size() -> Result<(), Box<dyn Error>> {
        let out = ImageConditioner::new().condition(&DynamicImage::ImageRgb8(fake_plate(320, 80)))?;
        assert_eq!(out.dimensions(), (320, 80));
        assert_eq!(out.scale(), 1.0);
        Ok(())
    }

    #[test]
    fn output_meets_size_floor() -> Result<(), Box<dyn Error>> {
        let conditioner = ImageConditioner::new();
        for (w, h) in [(1, 1), (7, 3), (199, 39), (250, 10), (13, 90)] {
            let out = conditioner.condition(&DynamicImage::ImageRgb8(fake_plate(w, h)))?;
            let (ow, oh) = out.dimensions();
            assert!(ow >= MIN_WIDTH && oh >= MIN_HEIGHT, "{}x{} became {}x{}", w, h, ow, oh);
        }
        Ok(())
    }

    #[test]
    fn output_is_binary() -> Result<(), Box<dyn Error>> {
        let out = ImageConditioner::new().condition(&DynamicImage::ImageRgb8(fake_plate(150, 35)))?;
        let values = distinct(out.image());
        assert_eq!(values, BTreeSet::from([0u8, 255]));
        Ok(())
    }

    #[test]
    fn flat_region_does_not_fail() -> Result<(), Box<dyn Error>> {
        let flat = GrayImage::from_pixel(240, 60, Luma([128]));
        let out = ImageConditioner::new().condition(&DynamicImage::ImageLuma8(flat))?;
        let values = distinct(out.image());
        assert_eq!(values.len(), 1);
        assert!(values.iter().all(|v| *v == 0 || *v == 255));
        Ok(())
    }

    #[test]
    fn thin_region_over_pixel_limit_is_invalid() {
        // scale 200 would make this 200 x 120000
        let thin = GrayImage::from_pixel(1, 600, Luma([250]));
        let err = ImageConditioner::new().condition(&DynamicImage::ImageLuma8(thin)).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidRegion(_)));

        let huge = GrayImage::new(2100, 2000);
        let err = ImageConditioner::new().condition(&DynamicImage::ImageLuma8(huge)).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidRegion(_)));
    }

    #[test]
    fn empty_region_is_invalid() {
        let err = ImageConditioner::new().condition(&DynamicImage::new_luma8(0, 10)).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidRegion(_)));
        let err = ImageConditioner::new().condition(&DynamicImage::new_rgb8(10, 0)).unwrap_err();
        assert!(matches!(err.kind(), LprErrorKind::InvalidRegion(_)));
    }

    #[test]
    fn clahe_keeps_flat_images_flat_and_order() {
        let flat = GrayImage::from_pixel(64, 48, Luma([90]));
        assert_eq!(distinct(&clahe(&flat, CLIP_LIMIT, TILE_GRID)).len(), 1);

        let split = GrayImage::from_fn(64, 64, |x, _| if x < 32 { Luma([60]) } else { Luma([190]) });
        let out = clahe(&split, CLIP_LIMIT, TILE_GRID);
        assert_eq!(out.dimensions(), (64, 64));
        let dark_max = (0..32).map(|x| out.get_pixel(x, 10)[0]).max().unwrap();
        let light_min = (32..64).map(|x| out.get_pixel(x, 10)[0]).min().unwrap();
        assert!(dark_max < light_min);
    }

    #[test]
    fn clip_histogram_conserves_mass() {
        let mut hist = [0u32; 256];
        hist[10] = 500;
        hist[200] = 12;
        clip_histogram(&mut hist, 20);
        assert_eq!(hist.iter().sum::<u32>(), 512);
        assert!(hist.iter().all(|c| *c <= 22));
    }

    #[test]
    fn gaussian_smooths_single_spike() {
        let mut img = GrayImage::from_pixel(5, 5, Luma([0]));
        img.put_pixel(2, 2, Luma([160]));
        let out = gaussian_blur_3x3(&img);
        assert_eq!(out.get_pixel(2, 2)[0], 40);
        assert_eq!(out.get_pixel(1, 2)[0], 20);
        assert_eq!(out.get_pixel(1, 1)[0], 10);
        assert_eq!(out.get_pixel(0, 0)[0], 0);

        let flat = GrayImage::from_pixel(6, 4, Luma([77]));
        assert_eq!(distinct(&gaussian_blur_3x3(&flat)), BTreeSet::from([77u8]));
    }

    #[test]
    fn binarize_is_strictly_above_level() {
        let ramp = GrayImage::from_fn(4, 1, |x, _| Luma([99 + x as u8]));
        let out = binarize(&ramp, 100);
        let values: Vec<u8> = out.pixels().map(|p| p[0]).collect();
        assert_eq!(values, vec![0, 0, 255, 255]);
    }

    #[test]
    fn reflect_mirrors_without_edge_repeat() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }
}

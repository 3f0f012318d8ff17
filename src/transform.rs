use image::{imageops, imageops::FilterType, DynamicImage, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;

pub const IMAGENET_DEFAULT_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_DEFAULT_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const IMAGENET_INCEPTION_MEAN: [f32; 3] = [0.5, 0.5, 0.5];
pub const IMAGENET_INCEPTION_STD: [f32; 3] = [0.5, 0.5, 0.5];

pub const DEFAULT_CROP_PCT: f64 = 224.0 / 256.0;

/// Inputs at or above this size are warped to a square instead of cropped.
const NO_CROP_SIZE: u32 = 384;
/// Inputs at or below this size are fed at native resolution.
const MIN_RESIZE_SIZE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Evaluation-time image to tensor conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    input_size: u32,
    crop_pct: f64,
    mean: [f32; 3],
    std: [f32; 3],
    channel_order: ChannelOrder,
}

impl Transform {
    pub fn eval(
        input_size: u32,
        crop_pct: Option<f64>,
        imagenet_default_mean_and_std: bool,
        channel_order: ChannelOrder,
    ) -> Self {
        let (mean, std) = if imagenet_default_mean_and_std {
            (IMAGENET_DEFAULT_MEAN, IMAGENET_DEFAULT_STD)
        } else {
            (IMAGENET_INCEPTION_MEAN, IMAGENET_INCEPTION_STD)
        };
        Self {
            input_size,
            crop_pct: crop_pct.unwrap_or(DEFAULT_CROP_PCT),
            mean,
            std,
            channel_order,
        }
    }

    /// Produces a `1 x 3 x H x W` normalized tensor.
    pub fn apply(&self, image: &DynamicImage) -> Array4<f32> {
        let image = self.resize_and_crop(&image.to_rgb8());
        self.to_tensor(&image)
    }

    fn resize_and_crop(&self, image: &RgbImage) -> RgbImage {
        let size = self.input_size;
        if size <= MIN_RESIZE_SIZE {
            return image.clone();
        }
        if size >= NO_CROP_SIZE {
            return imageops::resize(image, size, size, FilterType::CatmullRom);
        }

        let (w, h) = shorter_side_to(image.dimensions(), self.resize_short_side());
        let resized = imageops::resize(image, w, h, FilterType::CatmullRom);
        let (x, y) = center_offset((w, h), size);
        imageops::crop_imm(&resized, x, y, size.min(w), size.min(h)).to_image()
    }

    /// `floor(input_size / crop_pct)`, computed in double precision.
    fn resize_short_side(&self) -> u32 {
        (f64::from(self.input_size) / self.crop_pct) as u32
    }

    fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let chw = image.as_ndarray3();
        let nchw = match self.channel_order {
            ChannelOrder::Rgb => chw.slice_move(s![NewAxis, .., .., ..]),
            ChannelOrder::Bgr => chw.slice_move(s![NewAxis, ..;-1, .., ..]),
        };

        let mut tensor = nchw.mapv(|v| f32::from(v) / 255.0);
        for (c, mut plane) in tensor.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|v| (v - mean) / std);
        }
        tensor
    }
}

/// Scales `(w, h)` so the shorter side equals `target`, truncating the
/// longer side the way torchvision does.
fn shorter_side_to((w, h): (u32, u32), target: u32) -> (u32, u32) {
    if w <= h {
        (target, (target as u64 * h as u64 / w.max(1) as u64) as u32)
    } else {
        ((target as u64 * w as u64 / h.max(1) as u64) as u32, target)
    }
}

fn center_offset((w, h): (u32, u32), size: u32) -> (u32, u32) {
    let offset = |len: u32| ((len.saturating_sub(size)) as f32 / 2.0).round() as u32;
    (offset(w), offset(h))
}

//! Image preprocessing matching the training pipeline: resize to 512x512,
//! convert to RGB, rescale pixels to [0, 1]. No mean/std normalization was
//! used at training time.

use image::imageops::FilterType;
use image::DynamicImage;
use shared::IMG_SIZE;
use tch::{Device, Tensor};

/// Converts a decoded image into a `[1, 3, 512, 512]` float tensor in CHW
/// layout with values in [0, 1].
pub fn preprocess(image: &DynamicImage, device: Device) -> Tensor {
    let resized = image.resize_exact(IMG_SIZE, IMG_SIZE, FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let num_pixels = (IMG_SIZE * IMG_SIZE) as usize;
    let mut scaled = vec![0.0f32; 3 * num_pixels];
    for (i, pixel) in rgb.pixels().enumerate() {
        scaled[i] = pixel[0] as f32 / 255.0;
        scaled[num_pixels + i] = pixel[1] as f32 / 255.0;
        scaled[2 * num_pixels + i] = pixel[2] as f32 / 255.0;
    }

    Tensor::from_slice(&scaled)
        .view((1, 3, IMG_SIZE as i64, IMG_SIZE as i64))
        .to_device(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage};

    #[test]
    fn rgb_image_becomes_unit_scaled_nchw_tensor() {
        let img = RgbImage::from_pixel(64, 64, Rgb([255, 128, 0]));
        let tensor = preprocess(&DynamicImage::ImageRgb8(img), Device::Cpu);

        assert_eq!(tensor.size(), vec![1, 3, IMG_SIZE as i64, IMG_SIZE as i64]);
        let max = tensor.max().double_value(&[]);
        let min = tensor.min().double_value(&[]);
        assert!((0.0..=1.0).contains(&min));
        assert!((0.0..=1.0).contains(&max));
        // The red channel is uniform 255 so the max must sit at 1.0.
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn grayscale_input_is_expanded_to_three_channels() {
        let img = GrayImage::from_pixel(32, 48, image::Luma([90]));
        let tensor = preprocess(&DynamicImage::ImageLuma8(img), Device::Cpu);
        assert_eq!(tensor.size(), vec![1, 3, IMG_SIZE as i64, IMG_SIZE as i64]);
    }
}

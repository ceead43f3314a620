use image::ImageReader;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView4};
use std::io::Cursor;

pub const INPUT_HEIGHT: usize = 224;
pub const INPUT_WIDTH: usize = 224;
pub const INPUT_CHANNELS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Layout(#[from] ndarray::ShapeError),
    #[error("unexpected tensor shape {actual:?}, expected {expected:?}")]
    Shape {
        expected: [usize; 4],
        actual: Vec<usize>,
    },
}

/// Model input: one RGB image, NHWC, values scaled to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    pub const SHAPE: [usize; 4] = [1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS];

    pub fn from_array(data: Array4<f32>) -> Result<Self, PreprocessError> {
        if data.shape() != Self::SHAPE {
            return Err(PreprocessError::Shape {
                expected: Self::SHAPE,
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Row-major NHWC values.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

/// Decodes `bytes`, converts to RGB, resizes to 224x224 with bilinear
/// filtering and scales each channel from [0, 255] to [0, 1].
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;

    let rgb = image.to_rgb8();
    let resized = imageops::resize(
        &rgb,
        INPUT_WIDTH as u32,
        INPUT_HEIGHT as u32,
        FilterType::Triangle,
    );

    let values: Vec<f32> = resized
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();
    let data = Array4::from_shape_vec(
        (1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS),
        values,
    )?;

    ImageTensor::from_array(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn black_square_is_all_zeros() {
        let bytes = encode(&RgbImage::new(224, 224), ImageFormat::Png);
        let tensor = preprocess(&bytes).unwrap();
        assert_eq!(tensor.shape(), &ImageTensor::SHAPE);
        assert!(tensor.view().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn resizes_any_dimensions() {
        let image = RgbImage::from_pixel(300, 120, Rgb([255, 0, 128]));
        let tensor = preprocess(&encode(&image, ImageFormat::Png)).unwrap();
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);

        let view = tensor.view();
        for &(y, x) in &[(0, 0), (111, 57), (223, 223)] {
            assert!((view[[0, y, x, 0]] - 1.0).abs() < 1e-3);
            assert!(view[[0, y, x, 1]].abs() < 1e-3);
            assert!((view[[0, y, x, 2]] - 128.0 / 255.0).abs() < 1e-3);
        }
    }

    #[test]
    fn values_stay_in_unit_range() {
        let image = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 200]));
        let tensor = preprocess(&encode(&image, ImageFormat::Jpeg)).unwrap();
        assert!(tensor.view().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn identical_bytes_give_identical_tensors() {
        let image = RgbImage::from_fn(97, 41, |x, y| Rgb([x as u8, y as u8, (x ^ y) as u8]));
        let bytes = encode(&image, ImageFormat::Png);
        assert_eq!(preprocess(&bytes).unwrap(), preprocess(&bytes).unwrap());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(preprocess(b"definitely not an image").is_err());
        assert!(preprocess(&[]).is_err());
    }

    #[test]
    fn truncated_png_fails_to_decode() {
        let bytes = encode(&RgbImage::new(32, 32), ImageFormat::Png);
        assert!(preprocess(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn rejects_wrong_tensor_shape() {
        let err = ImageTensor::from_array(Array4::zeros((1, 3, 224, 224))).unwrap_err();
        assert!(matches!(err, PreprocessError::Shape { .. }));
    }
}

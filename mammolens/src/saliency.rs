//! Gradient-weighted class activation maps.
//!
//! Turns the classifier's last convolutional activations and the gradient of the
//! target logit into a single-channel attention map at input resolution.

use crate::error::AnalysisError;
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Per-pixel attention in [0, 1], shape (height, width). Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    values: Array2<f32>,
}

impl SaliencyMap {
    /// Wrap an existing (height, width) array, checking the value range
    pub fn from_array(values: Array2<f32>) -> Result<Self, AnalysisError> {
        if values.is_empty() {
            return Err(AnalysisError::DegenerateMap(
                "saliency map has no pixels".to_string(),
            ));
        }
        if let Some(bad) = values
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(AnalysisError::DegenerateMap(format!(
                "value {bad} outside [0, 1]"
            )));
        }
        Ok(Self { values })
    }

    /// All-zero map (no positive class evidence anywhere)
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            values: Array2::zeros((height as usize, width as usize)),
        }
    }

    pub fn width(&self) -> u32 {
        self.values.ncols() as u32
    }

    pub fn height(&self) -> u32 {
        self.values.nrows() as u32
    }

    pub fn pixel_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> ArrayView2<'_, f32> {
        self.values.view()
    }

    /// Value at pixel (x, y)
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[[y as usize, x as usize]]
    }

    /// Mean of all values (accumulated in f64)
    pub fn mean(&self) -> f64 {
        self.values.iter().map(|&v| v as f64).sum::<f64>() / self.pixel_count() as f64
    }

    /// Population standard deviation of all values
    pub fn std_dev(&self) -> f64 {
        let mean = self.mean();
        let var = self
            .values
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.pixel_count() as f64;
        var.sqrt()
    }

    pub fn max(&self) -> f32 {
        self.values.iter().fold(0.0f32, |acc, &v| acc.max(v))
    }

    /// Number of pixels strictly above `cutoff`
    pub fn count_above(&self, cutoff: f32) -> usize {
        self.values.iter().filter(|&&v| v > cutoff).count()
    }
}

/// Bilinear interpolation at fractional coordinates (u = column, v = row), clamped to the grid
pub fn bilinear_sample(data: &Array2<f32>, u: f32, v: f32) -> f32 {
    let (rows, cols) = data.dim();

    let u = u.clamp(0.0, (cols - 1) as f32);
    let v = v.clamp(0.0, (rows - 1) as f32);

    let u0 = u.floor() as usize;
    let v0 = v.floor() as usize;
    let u1 = (u0 + 1).min(cols - 1);
    let v1 = (v0 + 1).min(rows - 1);

    let fu = u - u0 as f32;
    let fv = v - v0 as f32;

    let val00 = data[[v0, u0]];
    let val10 = data[[v0, u1]];
    let val01 = data[[v1, u0]];
    let val11 = data[[v1, u1]];

    let val0 = val00 * (1.0 - fu) + val10 * fu;
    let val1 = val01 * (1.0 - fu) + val11 * fu;

    val0 * (1.0 - fv) + val1 * fv
}

/// Resample a grid to (height, width) with half-pixel centre alignment
pub fn resize_bilinear(data: &Array2<f32>, width: u32, height: u32) -> Array2<f32> {
    let (rows, cols) = data.dim();
    let scale_x = cols as f32 / width as f32;
    let scale_y = rows as f32 / height as f32;

    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
        let u = (x as f32 + 0.5) * scale_x - 0.5;
        let v = (y as f32 + 0.5) * scale_y - 0.5;
        bilinear_sample(data, u, v)
    })
}

/// Channel-weighted, rectified activation map at feature resolution
pub fn class_activation(
    activations: &Array3<f32>,
    gradients: &Array3<f32>,
) -> Result<Array2<f32>, AnalysisError> {
    if activations.shape() != gradients.shape() {
        return Err(AnalysisError::DegenerateMap(format!(
            "activation shape {:?} does not match gradient shape {:?}",
            activations.shape(),
            gradients.shape()
        )));
    }
    let (channels, rows, cols) = activations.dim();
    if channels == 0 || rows == 0 || cols == 0 {
        return Err(AnalysisError::DegenerateMap(format!(
            "empty activation volume {:?}",
            activations.shape()
        )));
    }

    let spatial = (rows * cols) as f64;
    let mut cam = Array2::<f64>::zeros((rows, cols));
    for (activation, gradient) in activations
        .axis_iter(Axis(0))
        .zip(gradients.axis_iter(Axis(0)))
    {
        let weight = gradient.iter().map(|&g| g as f64).sum::<f64>() / spatial;
        if weight == 0.0 {
            continue;
        }
        cam.zip_mut_with(&activation, |acc, &a| *acc += weight * a as f64);
    }

    if cam.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::DegenerateMap(
            "non-finite value in weighted activation sum".to_string(),
        ));
    }

    Ok(cam.mapv(|v| v.max(0.0) as f32))
}

/// Min-max normalize to [0, 1].
///
/// All-zero input stays all-zero; a flat non-zero map becomes uniformly 1.0.
pub fn normalize(data: Array2<f32>) -> Result<Array2<f32>, AnalysisError> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in data.iter() {
        if !v.is_finite() {
            return Err(AnalysisError::DegenerateMap(format!(
                "non-finite value {v} before normalization"
            )));
        }
        min = min.min(v);
        max = max.max(v);
    }

    if max == 0.0 && min == 0.0 {
        return Ok(data);
    }
    if max == min {
        return Ok(Array2::from_elem(data.raw_dim(), 1.0));
    }

    let range = max - min;
    Ok(data.mapv(|v| ((v - min) / range).clamp(0.0, 1.0)))
}

/// Build the saliency map for an image of `width` x `height` pixels
pub fn generate(
    activations: &Array3<f32>,
    gradients: &Array3<f32>,
    width: u32,
    height: u32,
) -> Result<SaliencyMap, AnalysisError> {
    if width == 0 || height == 0 {
        return Err(AnalysisError::DegenerateMap(format!(
            "target size {width}x{height} has no pixels"
        )));
    }

    let cam = class_activation(activations, gradients)?;
    log::debug!(
        "Class activation at {}x{}, peak {:.4}",
        cam.ncols(),
        cam.nrows(),
        cam.iter().fold(0.0f32, |acc, &v| acc.max(v))
    );

    let upsampled = resize_bilinear(&cam, width, height);
    let normalized = normalize(upsampled)?;
    SaliencyMap::from_array(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn volume(channels: usize, rows: usize, cols: usize, value: f32) -> Array3<f32> {
        Array3::from_elem((channels, rows, cols), value)
    }

    #[test]
    fn test_map_matches_target_size_and_range() {
        let activations =
            Array3::from_shape_fn((4, 7, 7), |(c, i, j)| ((c + 1) * (i * 7 + j)) as f32 / 50.0);
        let gradients = Array3::from_shape_fn((4, 7, 7), |(c, _, _)| c as f32 - 1.0);

        let map = generate(&activations, &gradients, 64, 48).unwrap();

        assert_eq!(map.width(), 64);
        assert_eq!(map.height(), 48);
        assert!(map.values().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!((map.max() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_negative_evidence_gives_zero_map() {
        let activations = volume(2, 5, 5, 1.0);
        let gradients = volume(2, 5, 5, -0.5);

        let map = generate(&activations, &gradients, 20, 20).unwrap();

        assert!(map.values().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_zero_gradients_give_zero_map() {
        let activations = volume(3, 4, 4, 2.0);
        let gradients = volume(3, 4, 4, 0.0);

        let map = generate(&activations, &gradients, 8, 8).unwrap();
        assert_eq!(map.max(), 0.0);
    }

    #[test]
    fn test_flat_positive_map_normalizes_to_one() {
        let activations = volume(1, 3, 3, 2.0);
        let gradients = volume(1, 3, 3, 0.25);

        let map = generate(&activations, &gradients, 10, 10).unwrap();
        assert!(map.values().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_shape_mismatch_is_degenerate() {
        let activations = volume(2, 4, 4, 1.0);
        let gradients = volume(3, 4, 4, 1.0);

        let err = generate(&activations, &gradients, 8, 8).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateMap(_)));
    }

    #[test]
    fn test_nan_is_degenerate() {
        let mut activations = volume(1, 2, 2, 1.0);
        activations[[0, 1, 1]] = f32::NAN;
        let gradients = volume(1, 2, 2, 1.0);

        let err = generate(&activations, &gradients, 4, 4).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateMap(_)));
    }

    #[test]
    fn test_hotspot_location_survives_upsampling() {
        let mut activations = volume(1, 8, 8, 0.0);
        activations[[0, 2, 6]] = 5.0;
        let gradients = volume(1, 8, 8, 1.0);

        let map = generate(&activations, &gradients, 80, 80).unwrap();

        // Feature cell (row 2, col 6) covers pixels x 60..70, y 20..30
        assert!(map.get(65, 25) > 0.9);
        assert_eq!(map.get(5, 75), 0.0);
    }

    #[test]
    fn test_bilinear_sample_interpolation() {
        let mut data = Array2::zeros((2, 2));
        data[[0, 1]] = 1.0;
        data[[1, 1]] = 1.0;

        let center = bilinear_sample(&data, 0.5, 0.5);
        assert!((center - 0.5).abs() < 1e-6);

        // Clamped outside the grid
        assert_eq!(bilinear_sample(&data, -3.0, -3.0), 0.0);
        assert_eq!(bilinear_sample(&data, 9.0, 9.0), 1.0);
    }

    #[test]
    fn test_from_array_rejects_out_of_range() {
        let data = Array2::from_elem((2, 2), 1.5f32);
        assert!(SaliencyMap::from_array(data).is_err());

        let data = Array2::from_elem((2, 2), 0.5f32);
        let map = SaliencyMap::from_array(data).unwrap();
        assert_eq!(map.count_above(0.4), 4);
        assert!((map.mean() - 0.5).abs() < 1e-12);
        assert_eq!(map.std_dev(), 0.0);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let activations =
            Array3::from_shape_fn((3, 6, 6), |(c, i, j)| ((c * 13 + i * 7 + j * 3) % 11) as f32);
        let gradients = Array3::from_shape_fn((3, 6, 6), |(c, i, _)| (c as f32 - i as f32) / 4.0);

        let a = generate(&activations, &gradients, 37, 29).unwrap();
        let b = generate(&activations, &gradients, 37, 29).unwrap();
        assert_eq!(a, b);
    }
}

use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;

use crate::model::{InferenceError, ScoreModel};

pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub index: usize,
    pub confidence: f32,
}

/// Resizes to `width`×`height` and lays the pixels out as a `[1, h, w, 3]`
/// batch with every channel scaled into `[0, 1]`.
pub fn preprocess(image: &DynamicImage, (width, height): (u32, u32)) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, width, height, FilterType::CatmullRom);

    Array4::from_shape_fn(
        (1, height as usize, width as usize, 3),
        |(_, y, x, channel)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    )
}

/// Index and value of the highest score. Ties go to the lowest index; NaN
/// scores never win.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| !score.is_nan())
        .fold(None, |best, (index, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((index, score)),
        })
}

pub struct Classifier {
    model: Box<dyn ScoreModel>,
    class_names: Vec<String>,
    input_size: (u32, u32),
}

impl Classifier {
    /// Wraps `model` and runs one warm-up pass so a model whose output width
    /// disagrees with `class_names` is rejected before serving traffic.
    pub fn new(
        model: Box<dyn ScoreModel>,
        class_names: Vec<String>,
        input_size: (u32, u32),
    ) -> Result<Self, InferenceError> {
        if class_names.is_empty() {
            return Err(InferenceError::NoClasses);
        }

        let (width, height) = input_size;
        let warmup = Array4::<f32>::zeros((1, height as usize, width as usize, 3));
        let outputs = model.forward(&warmup)?.len();
        if outputs != class_names.len() {
            return Err(InferenceError::ClassCountMismatch {
                outputs,
                labels: class_names.len(),
            });
        }

        Ok(Self {
            model,
            class_names,
            input_size,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn classify(&self, image: &DynamicImage) -> Result<Prediction, InferenceError> {
        let input = preprocess(image, self.input_size);
        let scores = self.model.forward(&input)?;
        self.decide(&scores)
    }

    fn decide(&self, scores: &[f32]) -> Result<Prediction, InferenceError> {
        if scores.len() != self.class_names.len() {
            return Err(InferenceError::ClassCountMismatch {
                outputs: scores.len(),
                labels: self.class_names.len(),
            });
        }

        let (index, confidence) = argmax(scores).ok_or(InferenceError::EmptyOutput)?;
        Ok(Prediction {
            label: self.class_names[index].clone(),
            index,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batik_shared::BatikClass;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedScores(Vec<f32>);

    impl ScoreModel for FixedScores {
        fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    /// Scores each class by the mean of one channel, so the answer depends on
    /// the pixels actually fed in.
    struct ChannelMeans;

    impl ScoreModel for ChannelMeans {
        fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            assert_eq!(input.shape(), &[1, 224, 224, 3]);
            let pixels = (224 * 224) as f32;
            let mut sums = vec![0.0f32; 4];
            for ((_, _, _, channel), value) in input.indexed_iter() {
                sums[channel] += value;
            }
            sums[3] = 0.25 * pixels;
            Ok(sums.into_iter().map(|sum| sum / pixels).collect())
        }
    }

    struct CountingModel {
        calls: Arc<AtomicUsize>,
        outputs: usize,
    }

    impl ScoreModel for CountingModel {
        fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1; self.outputs])
        }
    }

    /// Emits one score per class for the first pass, then drops a class.
    struct ShrinkingModel {
        calls: AtomicUsize,
    }

    impl ScoreModel for ShrinkingModel {
        fn forward(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            let width = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 { 4 } else { 3 };
            Ok(vec![0.25; width])
        }
    }

    fn classifier(model: impl ScoreModel + 'static) -> Classifier {
        Classifier::new(Box::new(model), BatikClass::names(), DEFAULT_INPUT_SIZE).unwrap()
    }

    fn assert_batch_in_unit_range(tensor: &Array4<f32>) {
        assert_eq!(tensor.shape(), &[1, 224, 224, 3]);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn preprocess_rgb_of_any_size() {
        for (w, h) in [(1, 1), (37, 512), (224, 224), (640, 480)] {
            let img = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 255]));
            assert_batch_in_unit_range(&preprocess(&DynamicImage::ImageRgb8(img), DEFAULT_INPUT_SIZE));
        }
    }

    #[test]
    fn preprocess_drops_alpha_and_expands_grayscale() {
        let rgba = RgbaImage::from_pixel(300, 100, Rgba([255, 0, 0, 0]));
        let tensor = preprocess(&DynamicImage::ImageRgba8(rgba), DEFAULT_INPUT_SIZE);
        assert_batch_in_unit_range(&tensor);
        assert_eq!(tensor[[0, 10, 10, 0]], 1.0);
        assert_eq!(tensor[[0, 10, 10, 2]], 0.0);

        let gray = GrayImage::from_pixel(50, 80, Luma([51]));
        let tensor = preprocess(&DynamicImage::ImageLuma8(gray), DEFAULT_INPUT_SIZE);
        assert_batch_in_unit_range(&tensor);
        for channel in 0..3 {
            assert!((tensor[[0, 100, 100, channel]] - 0.2).abs() < 1e-6);
        }
    }

    #[test]
    fn preprocess_scales_by_255() {
        let img: RgbImage = ImageBuffer::from_pixel(224, 224, Rgb([0, 255, 102]));
        let tensor = preprocess(&DynamicImage::ImageRgb8(img), DEFAULT_INPUT_SIZE);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 223, 223, 1]], 1.0);
        assert!((tensor[[0, 5, 7, 2]] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn argmax_prefers_first_maximum_and_skips_nan() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), Some((1, 0.7)));
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.1]), Some((1, 0.3)));
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), Some((1, -1.0)));
        assert_eq!(argmax(&[]), None);
        assert_eq!(argmax(&[f32::NAN]), None);
    }

    #[test]
    fn classify_reports_label_and_raw_maximum() {
        let classifier = classifier(FixedScores(vec![0.05, 0.8, 0.1, 0.05]));
        let img = DynamicImage::ImageRgb8(RgbImage::new(512, 512));

        let prediction = classifier.classify(&img).unwrap();
        assert_eq!(prediction.label, "Pamekasan");
        assert_eq!(prediction.index, 1);
        assert_eq!(prediction.confidence, 0.8);
    }

    #[test]
    fn confidence_is_not_renormalised() {
        let classifier = classifier(FixedScores(vec![2.5, -1.0, 7.25, 0.0]));
        let prediction = classifier
            .classify(&DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
            .unwrap();
        assert_eq!(prediction.label, "Sampang");
        assert_eq!(prediction.confidence, 7.25);
    }

    #[test]
    fn classify_depends_on_pixels_and_is_deterministic() {
        let classifier = classifier(ChannelMeans);
        let blue = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([10, 20, 250])));

        let first = classifier.classify(&blue).unwrap();
        let second = classifier.classify(&blue).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.label, "Sampang");
        assert!(BatikClass::names().contains(&first.label));

        let red = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 200, Rgb([250, 20, 10])));
        assert_eq!(classifier.classify(&red).unwrap().label, "Bangkalan");
    }

    #[test]
    fn new_rejects_output_width_that_disagrees_with_labels() {
        let err = Classifier::new(
            Box::new(FixedScores(vec![0.5, 0.5])),
            BatikClass::names(),
            DEFAULT_INPUT_SIZE,
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            InferenceError::ClassCountMismatch { outputs: 2, labels: 4 }
        ));
    }

    #[test]
    fn classify_rejects_output_width_change_after_startup() {
        let classifier = classifier(ShrinkingModel {
            calls: AtomicUsize::new(0),
        });
        let err = classifier
            .classify(&DynamicImage::ImageRgb8(RgbImage::new(10, 10)))
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ClassCountMismatch { outputs: 3, labels: 4 }
        ));
    }

    #[test]
    fn new_rejects_empty_label_list() {
        let err = Classifier::new(Box::new(FixedScores(vec![])), vec![], DEFAULT_INPUT_SIZE)
            .err()
            .unwrap();
        assert!(matches!(err, InferenceError::NoClasses));
    }

    #[test]
    fn new_runs_model_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let classifier = classifier(CountingModel {
            calls: calls.clone(),
            outputs: 4,
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.class_names().len(), 4);
        assert_eq!(classifier.input_size(), (224, 224));

        classifier
            .classify(&DynamicImage::ImageRgb8(RgbImage::new(16, 16)))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn all_nan_output_is_an_error() {
        let classifier = Classifier::new(
            Box::new(FixedScores(vec![f32::NAN; 4])),
            BatikClass::names(),
            DEFAULT_INPUT_SIZE,
        )
        .unwrap();
        let err = classifier
            .classify(&DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
            .unwrap_err();
        assert!(matches!(err, InferenceError::EmptyOutput));
    }
}

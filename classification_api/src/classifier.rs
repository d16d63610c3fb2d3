use crate::{config::ModelSettings, labels::LabelMap};
use image::imageops::FilterType;
use ndarray::{Array, Ix4};
use ort::{
    execution_providers::CPUExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to read image file: {0}")]
    Read(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("model emitted {0} scores for {1} labels")]
    OutputShape(usize, usize),
    #[error("class index {0} is not present in the label map")]
    UnknownClass(usize),
}

/// One classified image. `probabilities` always covers the full label set
/// and sums to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class_index: usize,
    pub label: String,
    pub confidence: f32,
    pub probabilities: BTreeMap<String, f32>,
}

fn transform_image(image_data: &[u8], input_size: u32) -> Result<Array<f32, Ix4>, ClassifierError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| ClassifierError::Decode(e.to_string()))?;

    let img = original_img.resize_exact(input_size, input_size, FilterType::CatmullRom);
    let side = input_size as usize;

    let mut input = Array::zeros((1, 3, side, side));
    for pixel in img.to_rgba8().enumerate_pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(input)
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Turn the raw output vector into a classification. The vector is
/// softmaxed unconditionally: argmax is unchanged whether the artifact
/// already ends in a softmax layer or emits logits, and the probabilities
/// are guaranteed to sum to 1 either way.
fn postprocess(output: &[f32], label_map: &LabelMap) -> Result<Classification, ClassifierError> {
    if output.len() != label_map.len() {
        return Err(ClassifierError::OutputShape(output.len(), label_map.len()));
    }

    let probabilities = softmax(output);
    let (class_index, confidence) = probabilities
        .iter()
        .enumerate()
        .map(|(index, value)| (index, *value))
        .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
        .ok_or(ClassifierError::OutputShape(0, label_map.len()))?;

    let label = label_map
        .get(class_index)
        .ok_or(ClassifierError::UnknownClass(class_index))?
        .to_string();

    let probabilities = label_map
        .iter()
        .map(String::from)
        .zip(probabilities)
        .collect();

    Ok(Classification {
        class_index,
        label,
        confidence,
        probabilities,
    })
}

#[derive(Clone)]
pub struct OrtClassifier {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    label_map: Arc<LabelMap>,
    input_size: u32,
    output_name: String,
}

impl OrtClassifier {
    pub fn new(
        model_config: &ModelSettings,
        label_map: LabelMap,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        ort::init()
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .commit()?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {} classes",
            num_instances,
            label_map.len()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            label_map: Arc::new(label_map),
            input_size: model_config.input_size,
            output_name: model_config.output_name.clone(),
        })
    }

    pub fn classify_bytes(&self, image_data: &[u8]) -> Result<Classification, ClassifierError> {
        let input = transform_image(image_data, self.input_size)?;
        let output = self.run_inference(&input)?;
        postprocess(&output, &self.label_map)
    }

    pub fn classify_path(&self, path: &Path) -> Result<Classification, ClassifierError> {
        let image_data =
            std::fs::read(path).map_err(|e| ClassifierError::Read(e.to_string()))?;
        self.classify_bytes(&image_data)
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<Vec<f32>, ClassifierError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| ClassifierError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| ClassifierError::Inference(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let (_, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                ClassifierError::Inference(format!("failed to extract tensor: {}", e))
            })?;

        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn label_map() -> LabelMap {
        LabelMap::from_labels(vec!["cats".to_string(), "dogs".to_string()]).unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([255, 0, 0]));
        let mut image_data: Vec<u8> = Vec::new();
        let mut cursor = Cursor::new(&mut image_data);
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        image_data
    }

    #[test]
    fn test_transform_image() {
        let input = transform_image(&png_bytes(100, 80), 150).unwrap();
        assert_eq!(input.shape(), &[1, 3, 150, 150]);
        // solid red source: full red channel, empty green and blue
        assert!((input[[0, 0, 75, 75]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 1, 75, 75]].abs() < 1e-6);
        assert!(input[[0, 2, 75, 75]].abs() < 1e-6);
    }

    #[test]
    fn transform_rejects_garbage_bytes() {
        let result = transform_image(b"not an image", 150);
        assert!(matches!(result, Err(ClassifierError::Decode(_))));
    }

    #[test]
    fn softmax_sums_to_one_and_keeps_argmax() {
        let probs = softmax(&[1.0, 3.0, 0.5]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[1] > probs[0] && probs[1] > probs[2]);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn softmax_is_stable_for_large_scores() {
        let probs = softmax(&[1000.0, 999.0]);
        assert!(probs.iter().all(|p| p.is_finite()));
        assert!(((probs[0] + probs[1]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn postprocess_picks_the_max_probability_label() {
        let classification = postprocess(&[0.2, 2.5], &label_map()).unwrap();
        assert_eq!(classification.class_index, 1);
        assert_eq!(classification.label, "dogs");
        assert_eq!(
            classification.confidence,
            classification.probabilities["dogs"]
        );
        assert!(classification.probabilities["dogs"] > classification.probabilities["cats"]);

        let sum: f32 = classification.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn postprocess_is_deterministic() {
        let first = postprocess(&[0.7, 0.3], &label_map()).unwrap();
        let second = postprocess(&[0.7, 0.3], &label_map()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn postprocess_rejects_mismatched_output() {
        let result = postprocess(&[0.1, 0.2, 0.7], &label_map());
        assert!(matches!(result, Err(ClassifierError::OutputShape(3, 2))));
    }
}

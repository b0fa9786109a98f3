//! ONNX sentence-embedding backend (all-MiniLM-L6-v2 layout).
//!
//! Expects `model.onnx` and `tokenizer.json` in the model directory.
//! Requires the `onnx` feature.

#[cfg(feature = "onnx")]
mod inner {
    use std::path::Path;

    use ndarray::Array1;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tokenizers::Tokenizer;
    use tracing::info;

    use crate::embedder::EmbedderBackend;
    use lumen_core::{Error, Result};

    const MAX_SEQ_LEN: usize = 512;

    fn infer_err(what: &str, e: impl std::fmt::Display) -> Error {
        Error::Inference(format!("{}: {}", what, e))
    }

    pub struct OnnxEmbedder {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        dimension: usize,
    }

    impl OnnxEmbedder {
        pub fn load(model_dir: &Path, dimension: usize) -> Result<Self> {
            let model_path = model_dir.join("model.onnx");
            let tokenizer_path = model_dir.join("tokenizer.json");
            for p in [&model_path, &tokenizer_path] {
                if !p.exists() {
                    return Err(Error::ModelFileMissing(p.clone()));
                }
            }

            // With load-dynamic, ORT_DYLIB_PATH must point to libonnxruntime.
            ort::init().commit();

            let session = Session::builder()
                .map_err(|e| infer_err("session builder", e))?
                .with_intra_threads(2)
                .map_err(|e| infer_err("intra threads", e))?
                .commit_from_file(&model_path)
                .map_err(|e| infer_err("load model", e))?;

            let tokenizer =
                Tokenizer::from_file(&tokenizer_path).map_err(|e| infer_err("load tokenizer", e))?;

            info!("ONNX embedder loaded: dim={}, model={}", dimension, model_path.display());

            Ok(Self {
                session: Mutex::new(session),
                tokenizer,
                dimension,
            })
        }
    }

    impl EmbedderBackend for OnnxEmbedder {
        fn embed(&self, text: &str) -> Result<Array1<f32>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| infer_err("tokenize", e))?;

            let seq_len = encoding.get_ids().len().min(MAX_SEQ_LEN);
            let ids: Vec<i64> = encoding.get_ids()[..seq_len].iter().map(|&x| x as i64).collect();
            let mask: Vec<i64> = encoding.get_attention_mask()[..seq_len]
                .iter()
                .map(|&x| x as i64)
                .collect();
            let type_ids = vec![0i64; seq_len];

            let ids_tensor =
                Tensor::from_array(([1usize, seq_len], ids)).map_err(|e| infer_err("ids tensor", e))?;
            let mask_tensor = Tensor::from_array(([1usize, seq_len], mask.clone()))
                .map_err(|e| infer_err("mask tensor", e))?;
            let type_tensor = Tensor::from_array(([1usize, seq_len], type_ids))
                .map_err(|e| infer_err("type_ids tensor", e))?;

            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![ids_tensor, mask_tensor, type_tensor])
                .map_err(|e| infer_err("inference", e))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| infer_err("extract output", e))?;
            let dims: Vec<i64> = shape.iter().copied().collect();

            match dims.as_slice() {
                // Token embeddings [1, seq, dim]: masked mean pooling.
                [_, seq, dim] => {
                    let (seq, dim) = (*seq as usize, *dim as usize);
                    let mut pooled = Array1::<f32>::zeros(dim);
                    let mut count = 0.0f32;
                    for (i, &m) in mask.iter().enumerate().take(seq) {
                        if m == 0 {
                            continue;
                        }
                        count += 1.0;
                        let row = &data[i * dim..(i + 1) * dim];
                        for (p, x) in pooled.iter_mut().zip(row) {
                            *p += *x;
                        }
                    }
                    if count == 0.0 {
                        return Err(Error::Inference("empty attention mask".into()));
                    }
                    Ok(pooled / count)
                }
                // Sentence embedding [1, dim].
                [_, dim] => Ok(Array1::from_vec(data[..*dim as usize].to_vec())),
                other => Err(Error::Inference(format!("unexpected output shape {:?}", other))),
            }
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn is_available(&self) -> bool {
            true
        }
    }
}

#[cfg(feature = "onnx")]
pub use inner::OnnxEmbedder;

//! ML inference module
//!
//! Person segmentation and pose presence via ONNX Runtime on a dedicated
//! worker thread. The render loop submits one cropped 256x256 frame per job
//! and never blocks; inference is serialized per feed slot through an
//! in-flight flag, so a slot never has two overlapping calls.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array4;
use parking_lot::Mutex;

use crate::pipeline::SLOT_COUNT;

/// Segmentation model input resolution (square)
pub const SEG_DIMENSION: u32 = 256;

/// Presence (pose detection) model input resolution (square)
const PRESENCE_DIMENSION: u32 = 224;

/// Raw pose score above which a person counts as present (logit space)
const PRESENCE_SCORE_THRESHOLD: f32 = 0.0;

/// Number of semantic classes in the multiclass selfie model
pub const MASK_CLASS_COUNT: usize = 6;

/// Semantic classes output by the segmentation model, in channel order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskClass {
    /// Person-negative; drives the cutout alpha in the overlay layout
    Background,
    Hair,
    BodySkin,
    FaceSkin,
    /// Drives the tint overlay
    Clothes,
    Accessories,
}

impl MaskClass {
    pub const ALL: [MaskClass; MASK_CLASS_COUNT] = [
        MaskClass::Background,
        MaskClass::Hair,
        MaskClass::BodySkin,
        MaskClass::FaceSkin,
        MaskClass::Clothes,
        MaskClass::Accessories,
    ];

    /// Channel index in the model output
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-class confidence masks from one segmentation call
///
/// Owned by whoever took it from the engine; masks are moved out on upload
/// and never reused across frames. A class the model did not produce is
/// `None` and routes to the texture cache's clear path.
pub struct MaskSet {
    masks: [Option<Vec<f32>>; MASK_CLASS_COUNT],
    pub width: u32,
    pub height: u32,
}

impl MaskSet {
    pub fn get(&self, class: MaskClass) -> Option<&[f32]> {
        self.masks[class.index()].as_deref()
    }

    pub fn take(&mut self, class: MaskClass) -> Option<Vec<f32>> {
        self.masks[class.index()].take()
    }
}

/// Result of one inference job
pub struct SlotResult {
    pub slot: usize,
    pub frame_number: u64,
    /// Confidence masks, absent when segmentation failed this frame
    pub masks: Option<MaskSet>,
    /// Presence verdict, absent when this job did not run presence
    pub presence: Option<bool>,
}

/// Job sent to the inference thread
struct InferenceJob {
    /// RGBA crop at SEG_DIMENSION x SEG_DIMENSION
    rgba: Vec<u8>,
    slot: usize,
    frame_number: u64,
    run_presence: bool,
}

/// Holds ONNX Runtime sessions for the loaded models
struct InferenceSession {
    segmentation: ort::session::Session,
    presence: Option<ort::session::Session>,
}

/// Segmentation + presence engine
pub struct SegmentationEngine {
    /// Per-slot mailbox for the latest unconsumed result
    results: [Arc<Mutex<Option<SlotResult>>>; SLOT_COUNT],
    /// Per-slot "job submitted, not yet resolved" flags
    in_flight: [Arc<AtomicBool>; SLOT_COUNT],
    /// Channel to the inference thread
    job_sender: Option<Sender<InferenceJob>>,
    /// Whether models are loaded and running
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl SegmentationEngine {
    pub fn new() -> Result<Self, String> {
        let results = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let in_flight = [
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        ];
        let running = Arc::new(AtomicBool::new(false));

        let (job_sender, job_receiver) = crossbeam_channel::bounded::<InferenceJob>(SLOT_COUNT);

        let results_clone = results.clone();
        let in_flight_clone = in_flight.clone();
        let running_clone = running.clone();

        let thread_handle = std::thread::Builder::new()
            .name("ml-inference".to_string())
            .spawn(move || {
                Self::inference_thread(job_receiver, results_clone, in_flight_clone, running_clone);
            })
            .map_err(|e| format!("Failed to spawn inference thread: {}", e))?;

        Ok(Self {
            results,
            in_flight,
            job_sender: Some(job_sender),
            running,
            thread_handle: Some(thread_handle),
        })
    }

    /// Submit a cropped frame for a slot (non-blocking)
    ///
    /// Returns false when the slot already has a job in flight or the
    /// channel is full; the caller just skips inference this frame.
    pub fn submit(&self, slot: usize, rgba: &[u8], frame_number: u64, run_presence: bool) -> bool {
        let flag = &self.in_flight[slot];
        if flag.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Some(ref sender) = self.job_sender else {
            flag.store(false, Ordering::Release);
            return false;
        };

        let sent = sender
            .try_send(InferenceJob {
                rgba: rgba.to_vec(),
                slot,
                frame_number,
                run_presence,
            })
            .is_ok();

        if !sent {
            flag.store(false, Ordering::Release);
        }
        sent
    }

    /// True while the slot's last job has not resolved
    pub fn is_in_flight(&self, slot: usize) -> bool {
        self.in_flight[slot].load(Ordering::Acquire)
    }

    /// Take (move out) the latest result for a slot, if any
    pub fn take_result(&self, slot: usize) -> Option<SlotResult> {
        self.results[slot].lock().take()
    }

    /// Check if models are loaded and running
    pub fn is_ready(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn inference_thread(
        job_receiver: Receiver<InferenceJob>,
        results: [Arc<Mutex<Option<SlotResult>>>; SLOT_COUNT],
        in_flight: [Arc<AtomicBool>; SLOT_COUNT],
        running: Arc<AtomicBool>,
    ) {
        log::info!("ML inference thread started");

        let mut session = match Self::init_ort() {
            Ok(s) => {
                running.store(true, Ordering::Release);
                log::info!("ONNX Runtime initialized successfully");
                Some(s)
            }
            Err(e) => {
                log::warn!("Failed to initialize ONNX Runtime: {}. ML features disabled.", e);
                None
            }
        };

        while let Ok(job) = job_receiver.recv() {
            let slot = job.slot;
            if let Some(ref mut session) = session {
                match Self::run_job(session, &job) {
                    Ok(result) => {
                        *results[slot].lock() = Some(result);
                    }
                    Err(e) => {
                        // Treated as "no result this frame"; prior state stays
                        log::warn!("Inference error (slot {}): {}", slot, e);
                    }
                }
            }
            in_flight[slot].store(false, Ordering::Release);
        }

        running.store(false, Ordering::Release);
        log::info!("ML inference thread stopped");
    }

    /// Initialize ONNX Runtime and load models
    fn init_ort() -> Result<InferenceSession, String> {
        let model_dir = Self::find_model_dir()?;
        log::info!("Model directory: {:?}", model_dir);

        let seg_path = model_dir.join("selfie_multiclass_256x256.onnx");
        if !seg_path.exists() {
            return Err(format!("Segmentation model not found: {:?}", seg_path));
        }

        ort::init()
            .with_name("PhotoBooth")
            .commit()
            .map_err(|e| format!("Failed to initialize ORT: {}", e))?;

        let session_builder = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create session builder: {}", e))?;

        let segmentation = session_builder
            .clone()
            .with_intra_threads(2)
            .map_err(|e| format!("Failed to set threads: {}", e))?
            .commit_from_file(&seg_path)
            .map_err(|e| format!("Failed to load segmentation model: {}", e))?;

        log::info!("Loaded segmentation model from {:?}", seg_path);

        // Presence is optional: without the model the booth still composites,
        // it just never finds anyone
        let presence_path = model_dir.join("pose_detection.onnx");
        let presence = if presence_path.exists() {
            match session_builder
                .clone()
                .with_intra_threads(1)
                .map_err(|e| format!("Failed to set threads: {}", e))?
                .commit_from_file(&presence_path)
            {
                Ok(s) => {
                    log::info!("Loaded presence model from {:?}", presence_path);
                    Some(s)
                }
                Err(e) => {
                    log::warn!("Failed to load presence model: {}", e);
                    None
                }
            }
        } else {
            log::warn!("Presence model not found: {:?}", presence_path);
            None
        };

        Ok(InferenceSession {
            segmentation,
            presence,
        })
    }

    /// Find the models directory
    fn find_model_dir() -> Result<PathBuf, String> {
        if let Ok(exe_path) = std::env::current_exe() {
            let mut dir = exe_path.parent();
            // Walk up a few levels to cover cargo target layouts
            for _ in 0..3 {
                if let Some(parent) = dir {
                    let model_dir = parent.join("models");
                    if model_dir.exists() {
                        return Ok(model_dir);
                    }
                    dir = parent.parent();
                }
            }
        }

        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        let model_dir = cwd.join("models");
        if model_dir.exists() {
            return Ok(model_dir);
        }

        Err("Models directory not found. Create a 'models' directory with ONNX models.".to_string())
    }

    fn run_job(session: &mut InferenceSession, job: &InferenceJob) -> Result<SlotResult, String> {
        let masks = Self::run_segmentation(&mut session.segmentation, &job.rgba)?;

        let presence = if job.run_presence {
            match session.presence {
                Some(ref mut presence_session) => {
                    Some(Self::run_presence(presence_session, &job.rgba)?)
                }
                None => None,
            }
        } else {
            None
        };

        Ok(SlotResult {
            slot: job.slot,
            frame_number: job.frame_number,
            masks: Some(masks),
            presence,
        })
    }

    /// Run multiclass segmentation on a SEG_DIMENSION square RGBA crop
    fn run_segmentation(
        session: &mut ort::session::Session,
        rgba: &[u8],
    ) -> Result<MaskSet, String> {
        let input = rgba_to_nhwc(rgba, SEG_DIMENSION, SEG_DIMENSION);

        let input_array = Array4::from_shape_vec(
            (1, SEG_DIMENSION as usize, SEG_DIMENSION as usize, 3),
            input,
        )
        .map_err(|e| format!("Failed to create input array: {}", e))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| format!("Failed to create tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("Inference failed: {}", e))?;

        let output = outputs
            .iter()
            .next()
            .ok_or("No output from segmentation model")?;

        let (_shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract output: {}", e))?;

        split_confidence_channels(data, SEG_DIMENSION, SEG_DIMENSION)
    }

    /// Run pose presence on a SEG_DIMENSION square RGBA crop
    fn run_presence(session: &mut ort::session::Session, rgba: &[u8]) -> Result<bool, String> {
        let resized = resize_rgba_nearest(
            rgba,
            SEG_DIMENSION,
            SEG_DIMENSION,
            PRESENCE_DIMENSION,
            PRESENCE_DIMENSION,
        );
        let input = rgba_to_nhwc(&resized, PRESENCE_DIMENSION, PRESENCE_DIMENSION);

        let input_array = Array4::from_shape_vec(
            (1, PRESENCE_DIMENSION as usize, PRESENCE_DIMENSION as usize, 3),
            input,
        )
        .map_err(|e| format!("Failed to create input array: {}", e))?;

        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| format!("Failed to create tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("Inference failed: {}", e))?;

        // First output holds per-anchor scores (logits); any anchor above
        // the threshold means someone is in frame
        let output = outputs
            .iter()
            .next()
            .ok_or("No output from presence model")?;

        let (_shape, scores) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract output: {}", e))?;

        let best = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        Ok(best > PRESENCE_SCORE_THRESHOLD)
    }

    /// Stop the inference thread
    pub fn stop(&mut self) {
        // Drop sender to signal thread to stop
        self.job_sender = None;

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SegmentationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Convert RGBA bytes to NHWC float RGB in [0, 1]
fn rgba_to_nhwc(rgba: &[u8], width: u32, height: u32) -> Vec<f32> {
    let mut output = vec![0.0f32; (width * height * 3) as usize];

    for i in 0..(width * height) as usize {
        let src = i * 4;
        if src + 2 < rgba.len() {
            output[i * 3] = rgba[src] as f32 / 255.0;
            output[i * 3 + 1] = rgba[src + 1] as f32 / 255.0;
            output[i * 3 + 2] = rgba[src + 2] as f32 / 255.0;
        }
    }

    output
}

/// Nearest-neighbor resize of an RGBA buffer
fn resize_rgba_nearest(src: &[u8], sw: u32, sh: u32, dw: u32, dh: u32) -> Vec<u8> {
    let mut output = vec![0u8; (dw * dh * 4) as usize];
    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;

    for y in 0..dh {
        let sy = ((y as f32 * y_ratio) as u32).min(sh - 1);
        for x in 0..dw {
            let sx = ((x as f32 * x_ratio) as u32).min(sw - 1);
            let src_idx = ((sy * sw + sx) * 4) as usize;
            let dst_idx = ((y * dw + x) * 4) as usize;
            if src_idx + 3 < src.len() {
                output[dst_idx..dst_idx + 4].copy_from_slice(&src[src_idx..src_idx + 4]);
            }
        }
    }

    output
}

/// De-interleave a pixel-major multi-channel confidence tensor into planes
///
/// The multiclass model outputs `[1, H, W, C]`; each plane becomes one
/// per-class mask, values clamped to [0, 1]. Channels beyond the known
/// class count are ignored; missing channels stay absent.
fn split_confidence_channels(data: &[f32], width: u32, height: u32) -> Result<MaskSet, String> {
    let pixels = (width * height) as usize;
    if pixels == 0 || data.len() % pixels != 0 {
        return Err(format!(
            "Unexpected segmentation output length {} for {}x{}",
            data.len(),
            width,
            height
        ));
    }
    let channels = data.len() / pixels;

    let mut masks: [Option<Vec<f32>>; MASK_CLASS_COUNT] = Default::default();
    for class in MaskClass::ALL {
        let c = class.index();
        if c >= channels {
            break;
        }
        let mut plane = vec![0.0f32; pixels];
        for (i, value) in plane.iter_mut().enumerate() {
            *value = data[i * channels + c].clamp(0.0, 1.0);
        }
        masks[c] = Some(plane);
    }

    Ok(MaskSet {
        masks,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_split_into_planes() {
        // 2x1 image, 3 channels, pixel-major
        let data = vec![
            0.1, 0.5, 0.9, // pixel 0
            0.2, 0.6, 1.5, // pixel 1 (over-range, clamps)
        ];
        let set = split_confidence_channels(&data, 2, 1).unwrap();
        assert_eq!(set.get(MaskClass::Background).unwrap(), &[0.1, 0.2]);
        assert_eq!(set.get(MaskClass::Hair).unwrap(), &[0.5, 0.6]);
        assert_eq!(set.get(MaskClass::BodySkin).unwrap(), &[0.9, 1.0]);
        // Channels the model did not produce stay absent
        assert!(set.get(MaskClass::FaceSkin).is_none());
        assert!(set.get(MaskClass::Clothes).is_none());
    }

    #[test]
    fn take_moves_ownership_out() {
        let data = vec![0.25; 4 * 6];
        let mut set = split_confidence_channels(&data, 2, 2).unwrap();
        let plane = set.take(MaskClass::Clothes).unwrap();
        assert_eq!(plane.len(), 4);
        assert!(set.get(MaskClass::Clothes).is_none());
    }

    #[test]
    fn bad_output_length_is_rejected() {
        let data = vec![0.0; 7];
        assert!(split_confidence_channels(&data, 2, 1).is_err());
        assert!(split_confidence_channels(&[], 0, 0).is_err());
    }

    #[test]
    fn nhwc_conversion_normalizes() {
        let rgba = vec![255, 0, 127, 255, 0, 255, 0, 0];
        let out = rgba_to_nhwc(&rgba, 2, 1);
        assert_eq!(out.len(), 6);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 0.0).abs() < 1e-6);
        assert!((out[2] - 127.0 / 255.0).abs() < 1e-6);
        assert!((out[4] - 1.0).abs() < 1e-6);
    }
}

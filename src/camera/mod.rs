//! Camera capture module
//!
//! Cross-platform capture via nokhwa. Frames are grabbed on a background
//! thread and handed to the render thread through a triple buffer, so the
//! render loop never waits on the device. `RegionExtractor` pulls a crop of
//! the latest frame, resized in one step to the model input resolution.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;

use crate::crop::RectF;

/// Camera frame data
#[derive(Clone)]
pub struct CameraFrame {
    /// RGBA pixel data
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frame number
    pub frame_number: u64,
    /// Frame timestamp
    pub timestamp: Instant,
}

/// Crops and resizes frame regions into a reused scratch buffer
///
/// Inference input is a small fixed size (256x256), so the scratch is
/// allocated once and reused every frame instead of allocating per call.
pub struct RegionExtractor {
    target_w: u32,
    target_h: u32,
    scratch: Vec<u8>,
}

impl RegionExtractor {
    pub fn new(target_w: u32, target_h: u32) -> Self {
        Self {
            target_w,
            target_h,
            scratch: vec![0u8; (target_w * target_h * 4) as usize],
        }
    }

    /// Crop `region` (pixel space) out of `frame` and resize to the target
    ///
    /// Returns `None` when the region degenerates to zero area after
    /// clamping to the frame, so callers skip the slot this frame.
    pub fn extract(&mut self, frame: &CameraFrame, region: RectF) -> Option<&[u8]> {
        let fw = frame.width as f32;
        let fh = frame.height as f32;

        let x0 = region.x.clamp(0.0, fw);
        let y0 = region.y.clamp(0.0, fh);
        let x1 = (region.x + region.w).clamp(0.0, fw);
        let y1 = (region.y + region.h).clamp(0.0, fh);
        let cw = x1 - x0;
        let ch = y1 - y0;
        if cw < 1.0 || ch < 1.0 {
            return None;
        }

        let x_ratio = cw / self.target_w as f32;
        let y_ratio = ch / self.target_h as f32;

        for y in 0..self.target_h {
            let src_y = (y0 + y as f32 * y_ratio) as u32;
            let src_y = src_y.min(frame.height - 1);
            for x in 0..self.target_w {
                let src_x = (x0 + x as f32 * x_ratio) as u32;
                let src_x = src_x.min(frame.width - 1);
                let src_idx = ((src_y * frame.width + src_x) * 4) as usize;
                let dst_idx = ((y * self.target_w + x) * 4) as usize;

                if src_idx + 3 < frame.data.len() {
                    self.scratch[dst_idx..dst_idx + 4]
                        .copy_from_slice(&frame.data[src_idx..src_idx + 4]);
                }
            }
        }

        Some(&self.scratch)
    }
}

/// Information about an available camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Camera capture interface
pub struct CameraCapture {
    /// Latest captured frames - triple buffered
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    /// Index of the latest complete frame
    latest_frame_idx: Arc<AtomicU64>,
    /// Whether capture is running
    running: Arc<AtomicBool>,
    /// Capture thread handle
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Frame counter
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        let mut cameras = Vec::new();

        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => {
                for (idx, info) in camera_list.iter().enumerate() {
                    cameras.push(CameraInfo {
                        index: idx as u32,
                        name: info.human_name().to_string(),
                    });
                }
            }
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
            }
        }

        cameras
    }

    /// Start capturing from the given camera index
    pub fn new(camera_index: u32) -> Result<Self, String> {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let frame_count = Arc::new(AtomicU64::new(0));

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let running_clone = running.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    camera_index,
                    frames_clone,
                    latest_frame_idx_clone,
                    running_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| format!("Failed to spawn capture thread: {}", e))?;

        Ok(Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle: Some(thread_handle),
            frame_count,
        })
    }

    fn capture_thread(
        camera_index: u32,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (camera {})", camera_index);

        let index = CameraIndex::Index(camera_index);

        let requested =
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = match Camera::new(index.clone(), requested) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to open camera with highest resolution: {:?}", e);

                let requested2 = RequestedFormat::new::<RgbAFormat>(
                    RequestedFormatType::HighestResolution(nokhwa::utils::Resolution::new(
                        640, 480,
                    )),
                );

                match Camera::new(index.clone(), requested2) {
                    Ok(c) => c,
                    Err(e2) => {
                        log::warn!("Failed with HighestResolution: {:?}", e2);

                        let requested3 =
                            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::None);
                        match Camera::new(index, requested3) {
                            Ok(c) => c,
                            Err(e3) => {
                                log::error!(
                                    "Failed to open camera with all format attempts: {:?}",
                                    e3
                                );
                                return;
                            }
                        }
                    }
                }
            }
        };

        if let Err(e) = camera.open_stream() {
            log::error!("Failed to open camera stream: {:?}", e);
            return;
        }

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);

                        let camera_frame = CameraFrame {
                            data: image.into_raw(),
                            width: frame.resolution().width(),
                            height: frame.resolution().height(),
                            frame_number: frame_num,
                            timestamp: Instant::now(),
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);

                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }

        log::info!("Camera capture thread stopped");
    }

    /// Get the latest captured frame
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    /// True once at least one full frame has been buffered
    pub fn is_ready(&self) -> bool {
        self.frame_count.load(Ordering::Relaxed) > 0
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rgba: [u8; 4]) -> CameraFrame {
        CameraFrame {
            data: rgba.repeat((width * height) as usize),
            width,
            height,
            frame_number: 0,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn extract_fills_target_from_region() {
        let frame = solid_frame(64, 64, [10, 20, 30, 255]);
        let mut ex = RegionExtractor::new(8, 8);
        let out = ex
            .extract(&frame, RectF::new(16.0, 16.0, 32.0, 32.0))
            .expect("region is valid");
        assert_eq!(out.len(), 8 * 8 * 4);
        assert_eq!(&out[0..4], &[10, 20, 30, 255]);
        assert_eq!(&out[out.len() - 4..], &[10, 20, 30, 255]);
    }

    #[test]
    fn extract_picks_correct_quadrant() {
        // Left half red, right half green
        let mut frame = solid_frame(16, 16, [255, 0, 0, 255]);
        for y in 0..16u32 {
            for x in 8..16u32 {
                let idx = ((y * 16 + x) * 4) as usize;
                frame.data[idx..idx + 4].copy_from_slice(&[0, 255, 0, 255]);
            }
        }

        let mut ex = RegionExtractor::new(4, 4);
        let right = ex
            .extract(&frame, RectF::new(8.0, 0.0, 8.0, 16.0))
            .unwrap()
            .to_vec();
        assert_eq!(&right[0..4], &[0, 255, 0, 255]);

        let left = ex.extract(&frame, RectF::new(0.0, 0.0, 8.0, 16.0)).unwrap();
        assert_eq!(&left[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn degenerate_region_is_skipped() {
        let frame = solid_frame(32, 32, [1, 2, 3, 255]);
        let mut ex = RegionExtractor::new(8, 8);
        assert!(ex.extract(&frame, RectF::new(0.0, 0.0, 0.0, 0.0)).is_none());
        // Fully outside the frame clamps to zero area
        assert!(ex
            .extract(&frame, RectF::new(100.0, 100.0, 50.0, 50.0))
            .is_none());
    }
}

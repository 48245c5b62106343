//! Still capture
//!
//! Reads a region of the output texture back to the CPU and saves it as a
//! PNG. The GPU copy and buffer map happen synchronously (a capture is a
//! once-per-countdown event, not a per-frame one); PNG encoding and the
//! disk write run on a detached thread so the render loop is not blocked.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

const CAPTURE_DIR: &str = "captures";

/// Copy `region` (x, y, w, h) of `texture` into a CPU image and save it
///
/// The texture is expected to be Bgra8UnormSrgb, the output texture format;
/// channels are swizzled to RGBA before encoding.
pub fn capture_region(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    region: (u32, u32, u32, u32),
    label: &str,
) -> Result<(), String> {
    let (x, y, width, height) = region;
    if width == 0 || height == 0 {
        return Err("Capture region is empty".to_string());
    }
    if x + width > texture.width() || y + height > texture.height() {
        return Err(format!(
            "Capture region {}x{}+{}+{} exceeds texture {}x{}",
            width,
            height,
            x,
            y,
            texture.width(),
            texture.height()
        ));
    }

    // Buffer rows must be 256-byte aligned for texture-to-buffer copies
    let unpadded_bytes_per_row = width * 4;
    let padded_bytes_per_row =
        unpadded_bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT) * COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Capture Readback Buffer"),
        size: (padded_bytes_per_row * height) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Capture Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let (sender, receiver) = crossbeam_channel::bounded(1);
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::Maintain::Wait)
        .panic_on_timeout();
    receiver
        .recv()
        .map_err(|e| format!("Capture map callback lost: {}", e))?
        .map_err(|e| format!("Failed to map capture buffer: {:?}", e))?;

    let mapped = buffer.slice(..).get_mapped_range();
    let pixels = strip_row_padding(
        &mapped,
        padded_bytes_per_row as usize,
        unpadded_bytes_per_row as usize,
        height as usize,
    );
    drop(mapped);
    buffer.unmap();

    let path = capture_path(label);
    std::thread::Builder::new()
        .name("capture-save".to_string())
        .spawn(move || {
            if let Err(e) = save_png(pixels, width, height, &path) {
                log::error!("Failed to save capture: {}", e);
            } else {
                log::info!("Saved capture to {}", path.display());
            }
        })
        .map_err(|e| format!("Failed to spawn capture save thread: {}", e))?;

    Ok(())
}

/// Drop the per-row alignment padding and swizzle BGRA to RGBA
fn strip_row_padding(
    data: &[u8],
    padded_bytes_per_row: usize,
    unpadded_bytes_per_row: usize,
    rows: usize,
) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(unpadded_bytes_per_row * rows);
    for row in 0..rows {
        let start = row * padded_bytes_per_row;
        let row_data = &data[start..start + unpadded_bytes_per_row];
        for px in row_data.chunks_exact(4) {
            pixels.extend_from_slice(&[px[2], px[1], px[0], 255]);
        }
    }
    pixels
}

fn capture_path(label: &str) -> PathBuf {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    PathBuf::from(CAPTURE_DIR).join(format!("{}_{}.png", label, millis))
}

fn save_png(pixels: Vec<u8>, width: u32, height: u32, path: &std::path::Path) -> Result<(), String> {
    std::fs::create_dir_all(CAPTURE_DIR)
        .map_err(|e| format!("Failed to create capture directory: {}", e))?;

    let image = image::RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| "Capture buffer size mismatch".to_string())?;
    image
        .save(path)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_is_stripped_and_swizzled() {
        // 2x2 BGRA image padded to 16 bytes per row
        let mut data = vec![0u8; 32];
        // Row 0: blue pixel, red pixel
        data[0..4].copy_from_slice(&[255, 0, 0, 255]);
        data[4..8].copy_from_slice(&[0, 0, 255, 255]);
        // Row 1: green pixels
        data[16..20].copy_from_slice(&[0, 255, 0, 255]);
        data[20..24].copy_from_slice(&[0, 255, 0, 255]);

        let pixels = strip_row_padding(&data, 16, 8, 2);
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[0..4], &[0, 0, 255, 255]);
        assert_eq!(&pixels[4..8], &[255, 0, 0, 255]);
        assert_eq!(&pixels[8..12], &[0, 255, 0, 255]);
    }

    #[test]
    fn capture_paths_are_unique_per_label() {
        let a = capture_path("slot0");
        assert!(a.starts_with(CAPTURE_DIR));
        assert!(a.to_string_lossy().contains("slot0_"));
        assert!(a.to_string_lossy().ends_with(".png"));
    }
}

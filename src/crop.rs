//! Crop region mapping
//!
//! Converts user-authored percentage crop rectangles into pixel-space capture
//! regions and aspect-fit output placements. Percent form is authoritative;
//! pixel form is re-derived whenever the source resolution changes.

use serde::{Deserialize, Serialize};

/// Smallest crop edge allowed when editing, in percent of the source
pub const MIN_CROP_PERCENT: f32 = 2.0;

/// Plain rectangle used for both percent- and pixel-space crops
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl RectF {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// True if the rect encloses no area
    pub fn is_empty(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }
}

/// One crop region of the source feed
///
/// The percent rect (0-100 of the source) is what the user edits and what
/// gets persisted. The pixel rect is derived on every [`recompute`] and is
/// never stored independently of the source dimensions that produced it.
///
/// [`recompute`]: CropRegion::recompute
#[derive(Debug, Clone, Copy)]
pub struct CropRegion {
    percent: RectF,
    pixels: RectF,
}

impl CropRegion {
    pub fn new(percent: RectF) -> Self {
        let mut region = Self {
            percent: RectF::default(),
            pixels: RectF::default(),
        };
        region.set_percent(percent);
        region
    }

    pub fn percent(&self) -> RectF {
        self.percent
    }

    pub fn pixels(&self) -> RectF {
        self.pixels
    }

    /// Replace the percent rect, clamped to stay inside the source bounds
    pub fn set_percent(&mut self, rect: RectF) {
        let w = rect.w.clamp(MIN_CROP_PERCENT, 100.0);
        let h = rect.h.clamp(MIN_CROP_PERCENT, 100.0);
        let x = rect.x.clamp(0.0, 100.0 - w);
        let y = rect.y.clamp(0.0, 100.0 - h);
        self.percent = RectF::new(x, y, w, h);
    }

    /// Move the crop in percent space, keeping it inside the source
    pub fn move_to(&mut self, x: f32, y: f32) {
        self.percent.x = x.clamp(0.0, 100.0 - self.percent.w);
        self.percent.y = y.clamp(0.0, 100.0 - self.percent.h);
    }

    /// Resize the crop in percent space, keeping it inside the source
    pub fn resize_to(&mut self, w: f32, h: f32) {
        self.percent.w = w.clamp(MIN_CROP_PERCENT, 100.0 - self.percent.x);
        self.percent.h = h.clamp(MIN_CROP_PERCENT, 100.0 - self.percent.y);
    }

    /// Re-derive the pixel rect from the percent rect and source size
    ///
    /// A degenerate source (zero width or height) leaves the pixel rect
    /// zeroed rather than dividing by zero downstream.
    pub fn recompute(&mut self, source_w: f32, source_h: f32) {
        if source_w <= 0.0 || source_h <= 0.0 {
            self.pixels = RectF::default();
            return;
        }
        self.pixels = RectF::new(
            self.percent.x / 100.0 * source_w,
            self.percent.y / 100.0 * source_h,
            self.percent.w / 100.0 * source_w,
            self.percent.h / 100.0 * source_h,
        );
    }

    /// Pixel crop as a normalized 0-1 UV rect for the shader
    pub fn normalized(&self, source_w: f32, source_h: f32) -> [f32; 4] {
        if source_w <= 0.0 || source_h <= 0.0 {
            return [0.0; 4];
        }
        [
            self.pixels.x / source_w,
            self.pixels.y / source_h,
            self.pixels.w / source_w,
            self.pixels.h / source_h,
        ]
    }

    /// Recover the percent rect from a pixel rect and source size
    pub fn percent_from_pixels(pixels: RectF, source_w: f32, source_h: f32) -> RectF {
        if source_w <= 0.0 || source_h <= 0.0 {
            return RectF::default();
        }
        RectF::new(
            pixels.x / source_w * 100.0,
            pixels.y / source_h * 100.0,
            pixels.w / source_w * 100.0,
            pixels.h / source_h * 100.0,
        )
    }
}

/// Aspect-fit a content rectangle inside bounds
///
/// Wider content fills the width, taller content fills the height; the
/// result is centered with equal letterbox padding on the constrained axis.
pub fn aspect_fit(content_w: f32, content_h: f32, bounds_w: f32, bounds_h: f32) -> RectF {
    if content_w <= 0.0 || content_h <= 0.0 || bounds_w <= 0.0 || bounds_h <= 0.0 {
        return RectF::default();
    }

    let content_aspect = content_w / content_h;
    let bounds_aspect = bounds_w / bounds_h;

    let (w, h) = if content_aspect > bounds_aspect {
        (bounds_w, bounds_w / content_aspect)
    } else {
        (bounds_h * content_aspect, bounds_h)
    };

    RectF::new((bounds_w - w) / 2.0, (bounds_h - h) / 2.0, w, h)
}

/// One of the two logical capture regions of the source feed
///
/// Owns the crop region plus the aspect-fit placement of that crop inside
/// its half of the output canvas (normalized 0-1 within the half).
#[derive(Debug, Clone, Copy)]
pub struct FeedSlot {
    pub crop: CropRegion,
    placement: RectF,
}

impl FeedSlot {
    pub fn new(percent: RectF) -> Self {
        Self {
            crop: CropRegion::new(percent),
            placement: RectF::default(),
        }
    }

    /// Placement of the crop within its output half, normalized 0-1
    pub fn placement(&self) -> RectF {
        self.placement
    }

    /// Re-derive pixel crop and output placement
    ///
    /// Must be called whenever the source resolution, the crop rect, or the
    /// output half size changes.
    pub fn recompute(&mut self, source_w: f32, source_h: f32, half_w: f32, half_h: f32) {
        self.crop.recompute(source_w, source_h);

        let px = self.crop.pixels();
        let fit = aspect_fit(px.w, px.h, half_w, half_h);
        self.placement = if fit.is_empty() || half_w <= 0.0 || half_h <= 0.0 {
            RectF::default()
        } else {
            RectF::new(fit.x / half_w, fit.y / half_h, fit.w / half_w, fit.h / half_h)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_to_pixels_matches_source() {
        let mut crop = CropRegion::new(RectF::new(10.0, 5.0, 40.0, 90.0));
        crop.recompute(1920.0, 1080.0);
        let px = crop.pixels();
        assert_eq!(px.x, 192.0);
        assert_eq!(px.y, 54.0);
        assert_eq!(px.w, 768.0);
        assert_eq!(px.h, 972.0);
    }

    #[test]
    fn pixels_round_trip_to_percent() {
        let original = RectF::new(12.5, 33.0, 25.0, 50.0);
        let mut crop = CropRegion::new(original);
        crop.recompute(1280.0, 720.0);
        let back = CropRegion::percent_from_pixels(crop.pixels(), 1280.0, 720.0);
        assert!((back.x - original.x).abs() < 1e-4);
        assert!((back.y - original.y).abs() < 1e-4);
        assert!((back.w - original.w).abs() < 1e-4);
        assert!((back.h - original.h).abs() < 1e-4);
    }

    #[test]
    fn degenerate_source_short_circuits() {
        let mut crop = CropRegion::new(RectF::new(10.0, 10.0, 50.0, 50.0));
        crop.recompute(0.0, 1080.0);
        assert!(crop.pixels().is_empty());
        assert_eq!(crop.normalized(0.0, 1080.0), [0.0; 4]);
    }

    #[test]
    fn aspect_fit_wide_content_centers_vertically() {
        // 16:9 content in a square: width fills, height letterboxed
        let fit = aspect_fit(1920.0, 1080.0, 800.0, 800.0);
        assert_eq!(fit.w, 800.0);
        assert_eq!(fit.h, 450.0);
        assert_eq!(fit.x, 0.0);
        // Equal padding above and below
        assert_eq!(fit.y, (800.0 - 450.0) / 2.0);
        assert!(fit.y + fit.h <= 800.0);
    }

    #[test]
    fn aspect_fit_tall_content_centers_horizontally() {
        let fit = aspect_fit(1080.0, 1920.0, 1000.0, 500.0);
        assert_eq!(fit.h, 500.0);
        assert!((fit.w - 500.0 * 1080.0 / 1920.0).abs() < 1e-3);
        assert!((fit.x - (1000.0 - fit.w) / 2.0).abs() < 1e-3);
        assert_eq!(fit.y, 0.0);
    }

    #[test]
    fn edits_stay_within_bounds() {
        let mut crop = CropRegion::new(RectF::new(10.0, 10.0, 30.0, 30.0));
        crop.move_to(95.0, -20.0);
        let pct = crop.percent();
        assert_eq!(pct.x, 70.0);
        assert_eq!(pct.y, 0.0);

        crop.resize_to(80.0, 0.5);
        let pct = crop.percent();
        assert_eq!(pct.w, 30.0);
        assert_eq!(pct.h, MIN_CROP_PERCENT);
    }

    #[test]
    fn slot_placement_is_normalized_and_centered() {
        let mut slot = FeedSlot::new(RectF::new(0.0, 0.0, 50.0, 100.0));
        // 960x1080 pixel crop placed in a 960x1080 half: exact fit
        slot.recompute(1920.0, 1080.0, 960.0, 1080.0);
        let place = slot.placement();
        assert!((place.w - 1.0).abs() < 1e-5);
        assert!((place.h - 1.0).abs() < 1e-5);
        assert!(place.x.abs() < 1e-5);

        // Same crop in a wide half: pillarboxed, centered
        slot.recompute(1920.0, 1080.0, 1920.0, 1080.0);
        let place = slot.placement();
        assert!(place.w < 1.0);
        assert!((place.h - 1.0).abs() < 1e-5);
        assert!((place.x - (1.0 - place.w) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn slot_with_degenerate_crop_has_empty_placement() {
        let mut slot = FeedSlot::new(RectF::new(10.0, 10.0, 40.0, 40.0));
        slot.recompute(0.0, 0.0, 960.0, 1080.0);
        assert!(slot.placement().is_empty());
    }
}

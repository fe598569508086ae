//! Capture backend abstraction for UI snapshots.
//!
//! A snapshot is the image handed to the inference service alongside each
//! prompt. Two backends are provided:
//! - `StaticImageBackend` serves a fixed screenshot per variant
//! - `WireframeBackend` renders the element set onto a framebuffer, for runs
//!   without screenshots and for tests

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::types::{CaptureResult, SnapshotError, SnapshotResult};
use crate::elements::ElementSet;

/// Trait for capture backends
///
/// Implementations provide different methods of producing the UI image:
/// - `StaticImageBackend` for pre-recorded screenshots
/// - `WireframeBackend` for a programmatic rendering of the element set
pub trait CaptureBackend {
    /// Perform a capture and return the result
    fn capture(&mut self) -> SnapshotResult<CaptureResult>;

    /// Get the source type identifier (e.g., "static_image", "wireframe")
    fn source_type(&self) -> &str;
}

/// Serves the same screenshot file for every capture.
///
/// The file is decoded once on construction so a bad path fails the suite
/// before any session starts.
#[derive(Debug, Clone)]
pub struct StaticImageBackend {
    path: PathBuf,
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl StaticImageBackend {
    /// Load an image file (PNG, JPEG, ...) and keep it as PNG bytes
    pub fn open(path: impl AsRef<Path>) -> SnapshotResult<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path)?;
        let img = image::load_from_memory(&bytes)?;
        let png = if matches!(image::guess_format(&bytes), Ok(image::ImageFormat::Png)) {
            bytes
        } else {
            let mut out = Vec::new();
            img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
            out
        };
        Ok(Self {
            path,
            png,
            width: img.width(),
            height: img.height(),
        })
    }

    /// Path of the underlying image file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureBackend for StaticImageBackend {
    fn capture(&mut self) -> SnapshotResult<CaptureResult> {
        Ok(CaptureResult {
            image_data: self.png.clone(),
            width: self.width,
            height: self.height,
            metadata: Some(serde_json::json!({
                "image_file": self.path.display().to_string(),
            })),
        })
    }

    fn source_type(&self) -> &str {
        "static_image"
    }
}

/// A virtual framebuffer for programmatic drawing
///
/// Provides the drawing primitives the wireframe renderer needs:
/// - `fill()` - Fill entire buffer with a color
/// - `draw_rect()` - Draw a filled rectangle
/// - `draw_text()` - Draw text using font8x8 glyphs
/// - `get_pixel()` / `set_pixel()` - Direct pixel access
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    /// RGB pixel buffer (row-major, 3 bytes per pixel)
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a new framebuffer with the given dimensions, initialized to black
    pub fn new(width: u32, height: u32) -> Self {
        let buffer = vec![0u8; (width * height * 3) as usize];
        Self {
            width,
            height,
            buffer,
        }
    }

    /// Create a framebuffer initialized to a specific color
    pub fn with_color(width: u32, height: u32, color: [u8; 3]) -> Self {
        let mut fb = Self::new(width, height);
        fb.fill(color);
        fb
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the entire framebuffer with a color
    pub fn fill(&mut self, color: [u8; 3]) {
        for chunk in self.buffer.chunks_exact_mut(3) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle, clipped to the buffer
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
        for py in y..(y + h).min(self.height) {
            for px in x..(x + w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs
    ///
    /// Each character is 8x8 pixels. Text does not wrap.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 3], bg: [u8; 3]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x + 8 > self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 3], bg: [u8; 3]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                // font8x8 stores LSB as leftmost pixel
                let is_fg = (row >> bit) & 1 == 1;
                self.set_pixel(x + bit, py, if is_fg { fg } else { bg });
            }
        }
    }

    /// Get the color of a pixel (black when out of bounds)
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0];
        }
        let idx = ((y * self.width + x) * 3) as usize;
        [self.buffer[idx], self.buffer[idx + 1], self.buffer[idx + 2]]
    }

    /// Set the color of a pixel (ignored when out of bounds)
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.buffer[idx..idx + 3].copy_from_slice(&color);
    }

    /// Encode the framebuffer as PNG bytes
    pub fn to_png(&self) -> SnapshotResult<Vec<u8>> {
        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.buffer.clone())
            .ok_or_else(|| SnapshotError::Capture("Buffer size does not match dimensions".into()))?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
        Ok(bytes)
    }
}

const WIREFRAME_WIDTH: u32 = 800;
const WIREFRAME_ROW_HEIGHT: u32 = 28;
const WIREFRAME_HEADER: u32 = 36;
const BACKGROUND: [u8; 3] = [245, 245, 245];
const BUTTON: [u8; 3] = [60, 90, 160];
const INK: [u8; 3] = [20, 20, 20];
const WHITE: [u8; 3] = [255, 255, 255];

/// Renders a variant's clickable elements as a stack of labeled buttons.
///
/// The rendering is computed once; every capture returns the same image.
#[derive(Debug, Clone)]
pub struct WireframeBackend {
    variant: String,
    element_count: usize,
    framebuffer: Framebuffer,
}

impl WireframeBackend {
    pub fn new(variant: &str, elements: &ElementSet) -> Self {
        let rows = elements.len().max(1) as u32;
        let height = WIREFRAME_HEADER + rows * WIREFRAME_ROW_HEIGHT + 8;
        let mut fb = Framebuffer::with_color(WIREFRAME_WIDTH, height, BACKGROUND);

        fb.draw_text(8, 12, &format!("Variant {variant}"), INK, BACKGROUND);
        for (i, element) in elements.iter().enumerate() {
            let y = WIREFRAME_HEADER + i as u32 * WIREFRAME_ROW_HEIGHT;
            fb.draw_rect(8, y, WIREFRAME_WIDTH - 16, WIREFRAME_ROW_HEIGHT - 6, BUTTON);
            let label = if element.context.is_empty() {
                element.text.clone()
            } else {
                format!("{} ({})", element.text, element.context)
            };
            fb.draw_text(16, y + 7, &label, WHITE, BUTTON);
        }

        Self {
            variant: variant.to_string(),
            element_count: elements.len(),
            framebuffer: fb,
        }
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }
}

impl CaptureBackend for WireframeBackend {
    fn capture(&mut self) -> SnapshotResult<CaptureResult> {
        Ok(CaptureResult {
            image_data: self.framebuffer.to_png()?,
            width: self.framebuffer.width(),
            height: self.framebuffer.height(),
            metadata: Some(serde_json::json!({
                "wireframe": true,
                "variant": self.variant,
                "elements": self.element_count,
            })),
        })
    }

    fn source_type(&self) -> &str {
        "wireframe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::UiElement;

    fn elements() -> ElementSet {
        ElementSet::new(vec![
            UiElement::new("Checkout button", "cart summary"),
            UiElement::new("Cancel purchase", "cart footer"),
        ])
    }

    #[test]
    fn test_framebuffer_fill_and_rect() {
        let mut fb = Framebuffer::new(100, 100);
        fb.fill([128, 128, 128]);
        assert_eq!(fb.get_pixel(50, 50), [128, 128, 128]);

        fb.draw_rect(10, 10, 20, 20, [255, 0, 0]);
        assert_eq!(fb.get_pixel(15, 15), [255, 0, 0]);
        assert_eq!(fb.get_pixel(35, 35), [128, 128, 128]);
    }

    #[test]
    fn test_framebuffer_out_of_bounds_is_ignored() {
        let mut fb = Framebuffer::new(10, 10);
        fb.set_pixel(20, 20, [255, 255, 255]);
        assert_eq!(fb.get_pixel(20, 20), [0, 0, 0]);
        fb.draw_rect(5, 5, 50, 50, [1, 2, 3]);
        assert_eq!(fb.get_pixel(9, 9), [1, 2, 3]);
    }

    #[test]
    fn test_framebuffer_draw_text_marks_pixels() {
        let mut fb = Framebuffer::with_color(64, 16, [0, 0, 0]);
        fb.draw_text(0, 0, "A", [255, 255, 255], [0, 0, 0]);
        let lit = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| fb.get_pixel(x, y) == [255, 255, 255])
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn test_wireframe_capture_is_png_sized_to_elements() {
        let mut backend = WireframeBackend::new("A", &elements());
        let result = backend.capture().unwrap();

        assert_eq!(&result.image_data[1..4], b"PNG");
        assert_eq!(result.width, WIREFRAME_WIDTH);
        assert_eq!(result.height, WIREFRAME_HEADER + 2 * WIREFRAME_ROW_HEIGHT + 8);
        assert_eq!(backend.source_type(), "wireframe");
        let meta = result.metadata.unwrap();
        assert_eq!(meta["variant"], "A");
        assert_eq!(meta["elements"], 2);
    }

    #[test]
    fn test_static_image_backend_reads_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        let png = Framebuffer::with_color(40, 30, [10, 20, 30]).to_png().unwrap();
        std::fs::write(&path, &png).unwrap();

        let mut backend = StaticImageBackend::open(&path).unwrap();
        let result = backend.capture().unwrap();
        assert_eq!((result.width, result.height), (40, 30));
        assert_eq!(result.image_data, png);
    }

    #[test]
    fn test_static_image_backend_missing_file() {
        let err = StaticImageBackend::open("/nonexistent/variant_a.png").unwrap_err();
        assert!(matches!(err, SnapshotError::Io(_)));
    }
}

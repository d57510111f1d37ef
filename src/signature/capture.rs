// src/signature/capture.rs
//! Freehand signature capture.
//!
//! Turns a sequence of pointer/touch samples into a [`SignatureArtifact`].
//! Samples arrive in the coordinate space of the element the user draws on,
//! which may be laid out at any size, while the surface keeps a fixed backing
//! resolution. Each axis is rescaled independently with
//! `scale = internal_size / displayed_size`.

use crate::errors::CertificationError;
use crate::models::signature::SignatureArtifact;
use crate::signature::raster::{parse_hex_color, Surface};
use image::Rgba;
use log::debug;
use serde::{Deserialize, Serialize};

/// Pressure used when the input device does not report one (mouse input).
pub const DEFAULT_PRESSURE: f32 = 0.5;

/// Appearance and backing resolution of the capture surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SurfaceConfig {
    pub width: u32,
    pub height: u32,
    /// Line width at full pressure; actual width is `stroke_width * pressure`.
    pub stroke_width: f32,
    pub stroke_color: String,
    pub background_color: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 500,
            height: 200,
            stroke_width: 2.0,
            stroke_color: "#1e3a8a".into(),
            background_color: "#ffffff".into(),
        }
    }
}

/// A pointer sample in display coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct InputPoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub pressure: Option<f32>,
}

impl InputPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, pressure: None }
    }

    pub fn with_pressure(x: f32, y: f32, pressure: f32) -> Self {
        Self {
            x,
            y,
            pressure: Some(pressure),
        }
    }
}

/// A sample mapped onto the surface's internal resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfacePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

/// Signature capture surface.
///
/// # Lifecycle
/// `begin_stroke` -> `extend_stroke`* -> `end_stroke`, repeated per stroke.
/// Every completed stroke re-encodes the surface into a fresh artifact.
/// `clear` wipes everything back to an empty signature.
pub struct SignatureCapture {
    config: SurfaceConfig,
    surface: Surface,
    ink: Rgba<u8>,
    display_size: (f32, f32),
    disabled: bool,
    has_content: bool,
    last_point: Option<SurfacePoint>,
    stroke_count: u32,
    artifact: Option<SignatureArtifact>,
}

impl SignatureCapture {
    /// Builds a blank surface. The display size starts equal to the backing
    /// resolution (scale 1:1) until [`set_display_size`](Self::set_display_size)
    /// is called.
    ///
    /// # Errors
    /// [`CertificationError::Encoding`] if a configured color is not `#rrggbb`.
    pub fn new(config: SurfaceConfig) -> Result<Self, CertificationError> {
        let ink = parse_hex_color(&config.stroke_color)?;
        let background = parse_hex_color(&config.background_color)?;
        let surface = Surface::new(config.width, config.height, background);
        let display_size = (surface.width() as f32, surface.height() as f32);

        Ok(Self {
            config,
            surface,
            ink,
            display_size,
            disabled: false,
            has_content: false,
            last_point: None,
            stroke_count: 0,
            artifact: None,
        })
    }

    /// Records the size at which the surface is currently laid out.
    ///
    /// # Errors
    /// [`CertificationError::InvalidSignatureInput`] unless both dimensions are
    /// finite and positive.
    pub fn set_display_size(&mut self, width: f32, height: f32) -> Result<(), CertificationError> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if !valid(width) || !valid(height) {
            return Err(CertificationError::InvalidSignatureInput(format!(
                "display size {}x{}",
                width, height
            )));
        }
        self.display_size = (width, height);
        Ok(())
    }

    /// Disables or re-enables drawing. Disabling drops a stroke in progress.
    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
        if disabled {
            self.last_point = None;
        }
    }

    pub fn stroke_count(&self) -> u32 {
        self.stroke_count
    }

    /// Maps a display-space sample onto the backing resolution.
    ///
    /// A missing or zero pressure falls back to [`DEFAULT_PRESSURE`].
    pub fn map_point(&self, point: InputPoint) -> SurfacePoint {
        let scale_x = self.surface.width() as f32 / self.display_size.0;
        let scale_y = self.surface.height() as f32 / self.display_size.1;
        let pressure = match point.pressure {
            Some(p) if p > 0.0 => p.min(1.0),
            _ => DEFAULT_PRESSURE,
        };

        SurfacePoint {
            x: point.x * scale_x,
            y: point.y * scale_y,
            pressure,
        }
    }

    /// Starts a stroke at `point`.
    ///
    /// # Errors
    /// [`CertificationError::SurfaceDisabled`] when the surface is disabled.
    pub fn begin_stroke(&mut self, point: InputPoint) -> Result<(), CertificationError> {
        if self.disabled {
            return Err(CertificationError::SurfaceDisabled);
        }
        let mapped = self.map_point(point);
        let width = self.config.stroke_width * mapped.pressure;
        self.surface.stamp(mapped.x, mapped.y, width / 2.0, self.ink);
        self.last_point = Some(mapped);
        self.has_content = true;
        Ok(())
    }

    /// Draws a segment from the previous sample to `point`.
    ///
    /// No-op when no stroke is in progress or the surface is disabled.
    pub fn extend_stroke(&mut self, point: InputPoint) {
        if self.disabled {
            return;
        }
        let Some(last) = self.last_point else {
            return;
        };
        let mapped = self.map_point(point);
        let width = self.config.stroke_width * mapped.pressure;
        self.surface
            .line((last.x, last.y), (mapped.x, mapped.y), width, self.ink);
        self.last_point = Some(mapped);
    }

    /// Closes the current stroke and re-encodes the artifact.
    ///
    /// # Returns
    /// - `Ok(Some(artifact))` when a stroke was closed
    /// - `Ok(None)` when no stroke was in progress
    ///
    /// # Errors
    /// [`CertificationError::Encoding`] if PNG encoding fails.
    pub fn end_stroke(&mut self) -> Result<Option<&SignatureArtifact>, CertificationError> {
        if self.last_point.take().is_none() {
            return Ok(None);
        }
        self.stroke_count += 1;

        if self.has_content {
            let png = self.surface.encode_png()?;
            let image_data = format!("data:image/png;base64,{}", base64::encode(png));
            self.artifact = Some(SignatureArtifact::new(image_data, self.stroke_count));
            debug!("signature stroke {} captured", self.stroke_count);
        }
        Ok(self.artifact.as_ref())
    }

    /// Resets to a blank surface with no strokes and no artifact.
    pub fn clear(&mut self) {
        self.surface.reset();
        self.last_point = None;
        self.has_content = false;
        self.stroke_count = 0;
        self.artifact = None;
    }

    /// Returns the current artifact.
    ///
    /// # Errors
    /// [`CertificationError::EmptySignature`] if nothing has been drawn.
    pub fn export_artifact(&self) -> Result<SignatureArtifact, CertificationError> {
        match &self.artifact {
            Some(artifact) if self.stroke_count > 0 => Ok(artifact.clone()),
            _ => Err(CertificationError::EmptySignature),
        }
    }

    /// Replays whole strokes, as submitted by a remote drawing surface.
    ///
    /// The surface is cleared first, so `strokes` is the complete drawing.
    /// Empty strokes are skipped.
    ///
    /// # Errors
    /// [`CertificationError::InvalidSignatureInput`] if any sample has a
    /// non-finite coordinate; nothing is drawn in that case.
    pub fn replay(&mut self, strokes: &[Vec<InputPoint>]) -> Result<(), CertificationError> {
        let bad = strokes
            .iter()
            .flatten()
            .find(|p| !p.x.is_finite() || !p.y.is_finite());
        if let Some(point) = bad {
            return Err(CertificationError::InvalidSignatureInput(format!(
                "sample at ({}, {})",
                point.x, point.y
            )));
        }

        self.clear();
        for stroke in strokes {
            let Some((first, rest)) = stroke.split_first() else {
                continue;
            };
            self.begin_stroke(*first)?;
            for point in rest {
                self.extend_stroke(*point);
            }
            self.end_stroke()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn surface(&self) -> &Surface {
        &self.surface
    }
}

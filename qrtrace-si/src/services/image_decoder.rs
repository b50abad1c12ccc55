//! QR image decoding and capture metadata extraction
//!
//! Decodes submitted photographs into QR payloads and pulls capture metadata
//! (GPS geotag, capture time, device label) from EXIF. EXIF extraction never
//! fails decoding: a photo with no usable metadata degrades to no location,
//! receipt-time timestamp, and no device label.

use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{In, Tag, Value};
use qrtrace_common::db::models::GeoPoint;
use std::io::Cursor;
use thiserror::Error;
use tracing::{debug, warn};

/// Decode errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),
}

/// Capture metadata extracted from the submitted photograph
#[derive(Debug, Clone, Default)]
pub struct CaptureMetadata {
    /// GPS geotag when present; None otherwise
    pub location: Option<GeoPoint>,
    /// EXIF capture time when present; caller falls back to receipt time
    pub captured_at: Option<DateTime<Utc>>,
    /// "Make Model" when either EXIF tag is present
    pub device_label: Option<String>,
}

/// Result of decoding one submitted image
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Decoded QR payloads; may be empty when the image holds no QR code
    pub payloads: Vec<String>,
    pub metadata: CaptureMetadata,
}

/// Image decoder seam
///
/// The pipeline depends on this trait so tests can inject fixed payloads
/// without fabricating image bytes.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, image: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Production decoder: `image` + `rqrr` for QR detection, `kamadak-exif`
/// for capture metadata
pub struct QrImageDecoder;

impl ImageDecoder for QrImageDecoder {
    fn decode(&self, image: &[u8]) -> Result<DecodedImage, DecodeError> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| DecodeError::UnreadableImage(e.to_string()))?;

        let mut prepared = rqrr::PreparedImage::prepare(decoded.to_luma8());
        let grids = prepared.detect_grids();

        let mut payloads = Vec::new();
        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => payloads.push(content),
                Err(e) => {
                    // A detected grid that fails to decode is usually blur or
                    // partial occlusion; other grids in the frame may still read
                    warn!(error = %e, "Detected QR grid failed to decode");
                }
            }
        }

        let metadata = extract_capture_metadata(image);
        debug!(
            payloads = payloads.len(),
            has_location = metadata.location.is_some(),
            "Decoded submission image"
        );

        Ok(DecodedImage { payloads, metadata })
    }
}

/// Pull capture metadata out of EXIF; every failure degrades to defaults
fn extract_capture_metadata(image: &[u8]) -> CaptureMetadata {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(image)) {
        Ok(exif) => exif,
        Err(_) => return CaptureMetadata::default(),
    };

    CaptureMetadata {
        location: extract_location(&exif),
        captured_at: extract_captured_at(&exif),
        device_label: extract_device_label(&exif),
    }
}

fn extract_location(exif: &exif::Exif) -> Option<GeoPoint> {
    let latitude = dms_to_degrees(exif.get_field(Tag::GPSLatitude, In::PRIMARY)?)?
        * hemisphere_sign(exif, Tag::GPSLatitudeRef, b'S');
    let longitude = dms_to_degrees(exif.get_field(Tag::GPSLongitude, In::PRIMARY)?)?
        * hemisphere_sign(exif, Tag::GPSLongitudeRef, b'W');

    Some(GeoPoint {
        latitude,
        longitude,
        source: "gps".to_string(),
    })
}

/// Convert an EXIF degree/minute/second rational triplet to decimal degrees
fn dms_to_degrees(field: &exif::Field) -> Option<f64> {
    if let Value::Rational(parts) = &field.value {
        if parts.len() >= 3 {
            return Some(
                parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0,
            );
        }
    }
    None
}

/// -1.0 for southern/western hemisphere reference tags, 1.0 otherwise
fn hemisphere_sign(exif: &exif::Exif, tag: Tag, negative: u8) -> f64 {
    let first_byte = exif
        .get_field(tag, In::PRIMARY)
        .and_then(|field| match &field.value {
            Value::Ascii(groups) => groups.first().and_then(|g| g.first().copied()),
            _ => None,
        });

    match first_byte {
        Some(b) if b.eq_ignore_ascii_case(&negative) => -1.0,
        _ => 1.0,
    }
}

/// Capture timestamp: DateTimeOriginal, then DateTimeDigitized, then DateTime
fn extract_captured_at(exif: &exif::Exif) -> Option<DateTime<Utc>> {
    for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            let text = ascii_value(field)?;
            if let Some(timestamp) = parse_exif_datetime(&text) {
                return Some(timestamp);
            }
        }
    }
    None
}

/// Parse the EXIF datetime format ("2024:03:01 09:30:00")
fn parse_exif_datetime(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    for format in ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// "Make Model" device label when either tag is present
fn extract_device_label(exif: &exif::Exif) -> Option<String> {
    let make = exif
        .get_field(Tag::Make, In::PRIMARY)
        .and_then(ascii_value);
    let model = exif
        .get_field(Tag::Model, In::PRIMARY)
        .and_then(ascii_value);

    let label = match (make, model) {
        (Some(make), Some(model)) => format!("{} {}", make.trim(), model.trim()),
        (Some(make), None) => make.trim().to_string(),
        (None, Some(model)) => model.trim().to_string(),
        (None, None) => return None,
    };

    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn ascii_value(field: &exif::Field) -> Option<String> {
    match &field.value {
        Value::Ascii(groups) => groups
            .first()
            .map(|g| String::from_utf8_lossy(g).trim_end_matches('\0').to_string()),
        _ => None,
    }
}

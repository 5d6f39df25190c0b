//! Draw commands queued by page scripts

use serde::Deserialize;

/// One queued drawing operation, in view pixels
///
/// Coordinates arrive as script numbers and are rounded when rasterized.
/// `color` is straight-alpha RGBA, 0-255 per channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PaintCommand {
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: [f64; 4],
    },
    ClearRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl PaintCommand {
    /// Decode the JSON array produced by the page's drain function.
    pub fn parse_queue(json: &str) -> crate::Result<Vec<PaintCommand>> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::ScriptError(format!("malformed draw queue: {}", e))
        })
    }
}

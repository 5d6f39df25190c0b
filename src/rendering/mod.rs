//! Page rendering for the render-process helper
//!
//! Pages draw through the `surface` script object; calls are queued as
//! [`PaintCommand`]s and applied to a persistent [`Surface`] on repaint.

pub mod paint;
pub mod raster;

pub use paint::PaintCommand;
pub use raster::Surface;

/// Script installed in each page context before its own scripts run.
///
/// `__WEBFILTER_DRAIN__` hands the queued commands to the host as JSON.
pub fn surface_prelude(width: u32, height: u32) -> String {
    format!(
        r#"
(function () {{
  const queue = [];
  globalThis.window = globalThis;
  globalThis.surface = {{
    width: {width},
    height: {height},
    fillRect: function (x, y, w, h, color) {{
      const c = color || [0, 0, 0, 255];
      queue.push({{ op: "fill_rect", x: x, y: y, width: w, height: h,
                    color: [c[0], c[1], c[2], c.length > 3 ? c[3] : 255] }});
    }},
    clearRect: function (x, y, w, h) {{
      queue.push({{ op: "clear_rect", x: x, y: y, width: w, height: h }});
    }},
  }};
  globalThis.__WEBFILTER_DRAIN__ = function () {{
    return JSON.stringify(queue.splice(0, queue.length));
  }};
}})();
"#,
        width = width,
        height = height
    )
}

/// Script updating the page's idea of its size after a resize.
pub fn surface_resize(width: u32, height: u32) -> String {
    format!("surface.width = {}; surface.height = {};", width, height)
}

/// Expression returning the queued commands as a JSON array.
pub const DRAIN_SCRIPT: &str = "globalThis.__WEBFILTER_DRAIN__()";

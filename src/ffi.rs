//! C ABI
//!
//! ```c
//! int  filter_init(const char *config, int pixel_format, void **user_data);
//! int  filter_frame(unsigned char *data, unsigned int data_size, int width, int height,
//!                   int line_size, double ts_millis, void *user_data);
//! void filter_uninit(void *user_data);
//! ```
//!
//! Return codes are `0` for success and `1` for failure. `user_data` is an
//! opaque session handle owned by the caller between `filter_init` and
//! `filter_uninit`. Sessions use the built-in render-process backend.

use std::ffi::{c_char, c_double, c_int, c_uint, c_void, CStr};

use log::error;

use crate::builtin::ProcessBackend;
use crate::{FrameFilter, PixelFormat};

const OK: c_int = 0;
const FAILED: c_int = 1;

/// Create a session from `config` and store its handle in `*user_data`.
///
/// # Safety
///
/// `config` must be null or a valid NUL-terminated string, and `user_data`
/// must be null or valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn filter_init(
    config: *const c_char,
    pixel_format: c_int,
    user_data: *mut *mut c_void,
) -> c_int {
    if config.is_null() {
        error!("filter_init: config is null");
        return FAILED;
    }
    if user_data.is_null() {
        error!("filter_init: user_data is null");
        return FAILED;
    }
    let config = match CStr::from_ptr(config).to_str() {
        Ok(s) => s,
        Err(e) => {
            error!("filter_init: config is not UTF-8: {}", e);
            return FAILED;
        }
    };
    let format = match PixelFormat::try_from(pixel_format) {
        Ok(f) => f,
        Err(e) => {
            error!("filter_init: {}", e);
            return FAILED;
        }
    };

    match FrameFilter::init(config, format, ProcessBackend::new) {
        Ok(filter) => {
            *user_data = Box::into_raw(Box::new(filter)).cast();
            OK
        }
        Err(e) => {
            error!("filter_init: {}", e);
            FAILED
        }
    }
}

/// Composite the page over one frame in place.
///
/// # Safety
///
/// `user_data` must be a handle from `filter_init` that was not yet passed to
/// `filter_uninit`. `data` must be null or valid for reads and writes of
/// `data_size` bytes for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn filter_frame(
    data: *mut u8,
    data_size: c_uint,
    width: c_int,
    height: c_int,
    line_size: c_int,
    ts_millis: c_double,
    user_data: *mut c_void,
) -> c_int {
    if user_data.is_null() {
        error!("filter_frame: user_data is null");
        return FAILED;
    }
    let filter = &mut *user_data.cast::<FrameFilter>();

    let buffer: &mut [u8] = if data.is_null() {
        // An empty view fails the geometry check for any positive frame.
        &mut []
    } else {
        std::slice::from_raw_parts_mut(data, data_size as usize)
    };

    match filter.submit_frame(buffer, width, height, line_size, ts_millis) {
        Ok(()) => OK,
        Err(e) => {
            error!("filter_frame: {}", e);
            FAILED
        }
    }
}

/// Shut the session down and free it. Null is ignored.
///
/// # Safety
///
/// `user_data` must be null or a handle from `filter_init` not yet freed.
#[no_mangle]
pub unsafe extern "C" fn filter_uninit(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    let filter = Box::from_raw(user_data.cast::<FrameFilter>());
    filter.shutdown();
}

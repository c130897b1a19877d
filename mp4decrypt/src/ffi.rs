//! C ABI, declared in `include/mp4decrypt.h`.
//!
//! Every function returns a result code from [`crate::code`]. Buffers handed
//! out by [`mp4decrypt_decrypt`] are prefixed with a hidden length header so
//! that [`mp4decrypt_buffer_free`] only needs the pointer.

use crate::{Context, Error, KeyStore, code, decrypt_with_key_specs};
use std::{
    ffi::{CStr, c_char, c_int, c_uchar, c_uint, c_void},
    panic::{self, AssertUnwindSafe},
    ptr, slice,
};

const LENGTH_HEADER_SIZE: usize = size_of::<u64>();

/// Receives the output of [`mp4decrypt_decrypt_with_keys`].
pub type OutputCallback =
    extern "C" fn(user_data: *mut c_void, data: *const c_uchar, size: c_uint);

fn guard<F: FnOnce() -> c_int>(f: F) -> c_int {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        log::error!("panic caught at the C boundary");
        code::FAILURE
    })
}

fn status(result: crate::Result<()>) -> c_int {
    match result {
        Ok(()) => code::SUCCESS,
        Err(e) => {
            log::debug!("{}", e);
            e.code()
        }
    }
}

/// `None` for a null pointer.
unsafe fn bytes<'a>(data: *const c_uchar, size: c_uint) -> Option<&'a [u8]> {
    if data.is_null() {
        None
    } else {
        Some(unsafe { slice::from_raw_parts(data, size as usize) })
    }
}

unsafe fn path<'a>(path: *const c_char) -> crate::Result<&'a str> {
    let path = unsafe { CStr::from_ptr(path) };
    path.to_str()
        .map_err(|_| Error::NoSuchFile(path.to_string_lossy().into_owned()))
}

/// Copy `data` into a new buffer with a hidden length header.
fn into_raw_buffer(data: &[u8]) -> crate::Result<(*mut c_uchar, c_uint)> {
    let size = c_uint::try_from(data.len()).map_err(|_| Error::DataTooLarge)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(LENGTH_HEADER_SIZE + data.len())
        .map_err(|_| Error::DataTooLarge)?;
    buf.extend_from_slice(&(data.len() as u64).to_ne_bytes());
    buf.extend_from_slice(data);

    let base = Box::into_raw(buf.into_boxed_slice()) as *mut c_uchar;
    Ok((unsafe { base.add(LENGTH_HEADER_SIZE) }, size))
}

/// Create a context from `count` binary keys, each a 16 byte KID followed by a
/// 16 byte key. Returns null on failure.
///
/// # Safety
///
/// `keys` must point to `count * 32` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_context_new(keys: *const c_uchar, count: c_uint) -> *mut Context {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let len = match (count as usize).checked_mul(32) {
            Some(x) => x,
            None => return ptr::null_mut(),
        };

        let data = match (len, keys.is_null()) {
            (0, _) => &[][..],
            (_, true) => return ptr::null_mut(),
            (_, false) => unsafe { slice::from_raw_parts(keys, len) },
        };

        match KeyStore::from_binary(data) {
            Ok(keys) => Box::into_raw(Box::new(Context::new(keys))),
            Err(e) => {
                log::debug!("{}", e);
                ptr::null_mut()
            }
        }
    }))
    .unwrap_or(ptr::null_mut())
}

/// Release a context. Null is ignored.
///
/// # Safety
///
/// `context` must come from [`mp4decrypt_context_new`] and not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_context_free(context: *mut Context) {
    if !context.is_null() {
        let _ = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(context) });
        }));
    }
}

/// Decrypt a buffer. On success `*out_data` holds a buffer of `*out_size`
/// bytes which must be released with [`mp4decrypt_buffer_free`].
///
/// # Safety
///
/// Pointers must be valid for the given sizes. `fragments_info` may be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_decrypt(
    context: *const Context,
    data: *const c_uchar,
    size: c_uint,
    fragments_info: *const c_uchar,
    fragments_info_size: c_uint,
    out_data: *mut *mut c_uchar,
    out_size: *mut c_uint,
) -> c_int {
    guard(|| {
        if context.is_null() || out_data.is_null() || out_size.is_null() {
            return code::INVALID_PARAMETERS;
        }

        let context = unsafe { &*context };
        let Some(data) = (unsafe { bytes(data, size) }) else {
            return code::INVALID_PARAMETERS;
        };
        let fragments_info = unsafe { bytes(fragments_info, fragments_info_size) };

        status(
            context
                .decrypt(data, fragments_info)
                .and_then(|x| into_raw_buffer(&x))
                .map(|(ptr, len)| unsafe {
                    *out_data = ptr;
                    *out_size = len;
                }),
        )
    })
}

/// Decrypt `input_path` into `output_path`, streaming from disk.
///
/// # Safety
///
/// Paths must be null terminated strings, `init_path` may be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_decrypt_file(
    context: *const Context,
    init_path: *const c_char,
    input_path: *const c_char,
    output_path: *const c_char,
) -> c_int {
    guard(|| {
        if context.is_null() || input_path.is_null() || output_path.is_null() {
            return code::INVALID_PARAMETERS;
        }

        let context = unsafe { &*context };

        status((|| {
            let init_path = match init_path.is_null() {
                true => None,
                false => Some(unsafe { path(init_path) }?),
            };

            context.decrypt_file(
                unsafe { path(input_path) }?,
                unsafe { path(output_path) }?,
                init_path,
            )
        })())
    })
}

/// Release a buffer returned by [`mp4decrypt_decrypt`]. Null is ignored.
///
/// # Safety
///
/// Releasing a buffer twice, or one not returned by this library, is undefined behaviour.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_buffer_free(data: *mut c_uchar) {
    if data.is_null() {
        return;
    }

    unsafe {
        let base = data.sub(LENGTH_HEADER_SIZE);
        let len = ptr::read_unaligned(base as *const u64) as usize;
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            base,
            LENGTH_HEADER_SIZE + len,
        )));
    }
}

/// One-shot decrypt with `count` key specifications of the form `<id>:<key>`.
///
/// `callback` is invoked once on success. Its data pointer is only valid until
/// it returns.
///
/// # Safety
///
/// Pointers must be valid for the given sizes and `key_specs` must hold `count`
/// null terminated strings. `fragments_info` may be null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mp4decrypt_decrypt_with_keys(
    data: *const c_uchar,
    size: c_uint,
    key_specs: *const *const c_char,
    count: c_uint,
    fragments_info: *const c_uchar,
    fragments_info_size: c_uint,
    user_data: *mut c_void,
    callback: Option<OutputCallback>,
) -> c_int {
    guard(|| {
        let Some(callback) = callback else {
            return code::INVALID_PARAMETERS;
        };
        let Some(data) = (unsafe { bytes(data, size) }) else {
            return code::INVALID_PARAMETERS;
        };

        if key_specs.is_null() && count != 0 {
            return code::INVALID_PARAMETERS;
        }

        let mut specs = Vec::with_capacity(count as usize);

        for i in 0..count as usize {
            let spec = unsafe { *key_specs.add(i) };

            if spec.is_null() {
                return code::INVALID_PARAMETERS;
            }

            specs.push(unsafe { CStr::from_ptr(spec) }.to_string_lossy());
        }

        let fragments_info = unsafe { bytes(fragments_info, fragments_info_size) };
        let mut result = code::SUCCESS;

        let outcome = status(decrypt_with_key_specs(data, &specs, fragments_info, |x| {
            match c_uint::try_from(x.len()) {
                Ok(len) => callback(user_data, x.as_ptr(), len),
                Err(_) => result = code::OUT_OF_RANGE,
            }
        }));

        if outcome == code::SUCCESS { result } else { outcome }
    })
}

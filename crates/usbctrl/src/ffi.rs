//! C ABI
//!
//! Opaque-pointer API for C and C++ embedders. Each process creates its own
//! manager with [`usbctrl_manager_new`] and releases it with
//! [`usbctrl_manager_free`]; there is no global instance.
//!
//! Strings returned by [`usbctrl_get_property`] are NUL-terminated and must
//! be released with [`usbctrl_string_free`]. Device lists returned by
//! [`usbctrl_register_callback`] must be released with
//! [`usbctrl_device_list_free`].

use crate::callback::DeviceCallback;
use crate::source::udev::UdevSource;
use crate::source::{DeviceFilter, DeviceSource};
use crate::types::DeviceId;
use crate::{DeviceManager, Result};
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;
use tracing::{error, warn};

pub const USBCTRL_SUCCESS: c_int = 0;
pub const USBCTRL_FAILURE: c_int = -1;

/// `callback(identifier, connected, payload)`; `connected` is 1 or 0
pub type UsbctrlCallback = extern "C" fn(id: u32, connected: c_int, payload: *mut c_void);

/// Manager type behind the opaque C pointer
pub type UsbctrlManager = DeviceManager<UdevSource>;

/// Caller payload handed back verbatim to the C callback
struct Payload(*mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side. It is passed
// back to the caller's callback on the monitor thread; the caller registered
// it knowing the callback runs there.
unsafe impl Send for Payload {}
unsafe impl Sync for Payload {}

impl Payload {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

fn result_code(result: Result<()>) -> c_int {
    match result {
        Ok(()) => USBCTRL_SUCCESS,
        Err(e) => {
            error!("{}", e);
            USBCTRL_FAILURE
        }
    }
}

fn c_callback(callback: UsbctrlCallback, payload: *mut c_void) -> DeviceCallback {
    let payload = Payload(payload);
    Arc::new(move |id: DeviceId, connected: bool| callback(id.0, c_int::from(connected), payload.get()))
}

/// Install a C callback and return the snapshot of present devices
pub(crate) fn register_c_callback<S: DeviceSource>(
    manager: &DeviceManager<S>,
    callback: Option<UsbctrlCallback>,
    payload: *mut c_void,
) -> Vec<DeviceId> {
    match callback {
        Some(callback) => manager.register_shared_callback(c_callback(callback, payload)),
        None => {
            manager.unregister_callback();
            manager.devices()
        }
    }
}

/// Property value as an owned C string, `None` when there is none
pub(crate) fn property_cstring<S: DeviceSource>(
    manager: &DeviceManager<S>,
    id: u32,
    key: &CStr,
) -> Option<CString> {
    let Ok(key) = key.to_str() else {
        warn!("Property name is not valid UTF-8");
        return None;
    };

    match manager.get_property(DeviceId(id), key) {
        Ok(value) => match CString::new(value) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Property '{}' of device {} contains a NUL byte", key, id);
                None
            }
        },
        Err(e) => {
            error!("{}", e);
            None
        }
    }
}

fn device_list_into_raw(devices: Vec<DeviceId>) -> (*mut u32, usize) {
    if devices.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let list: Box<[u32]> = devices.into_iter().map(u32::from).collect();
    let len = list.len();
    (Box::into_raw(list).cast::<u32>(), len)
}

/// Open libudev and create a manager; null on failure
#[unsafe(no_mangle)]
pub extern "C" fn usbctrl_manager_new() -> *mut UsbctrlManager {
    match DeviceManager::open(&DeviceFilter::default()) {
        Ok(manager) => Box::into_raw(Box::new(manager)),
        Err(e) => {
            error!("Critical error! {}", e);
            ptr::null_mut()
        }
    }
}

/// Terminate and destroy a manager
///
/// # Safety
/// `manager` must be null or a pointer from [`usbctrl_manager_new`] that has
/// not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_manager_free(manager: *mut UsbctrlManager) {
    if !manager.is_null() {
        // SAFETY: guaranteed by the caller
        drop(unsafe { Box::from_raw(manager) });
    }
}

/// # Safety
/// `manager` must be null or a live pointer from [`usbctrl_manager_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_init(manager: *const UsbctrlManager) -> c_int {
    // SAFETY: guaranteed by the caller
    match unsafe { manager.as_ref() } {
        Some(manager) => result_code(manager.init()),
        None => USBCTRL_FAILURE,
    }
}

/// # Safety
/// `manager` must be null or a live pointer from [`usbctrl_manager_new`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_term(manager: *const UsbctrlManager) -> c_int {
    // SAFETY: guaranteed by the caller
    match unsafe { manager.as_ref() } {
        Some(manager) => result_code(manager.terminate()),
        None => USBCTRL_FAILURE,
    }
}

/// Register `callback` (null clears it) and report the present devices
///
/// `device_list` / `device_count` may be null, in which case no list is
/// returned. An empty list is reported as a null pointer with count 0.
///
/// # Safety
/// `manager` must be null or a live pointer from [`usbctrl_manager_new`];
/// `device_list` and `device_count` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_register_callback(
    manager: *const UsbctrlManager,
    callback: Option<UsbctrlCallback>,
    payload: *mut c_void,
    device_list: *mut *mut u32,
    device_count: *mut usize,
) -> c_int {
    // SAFETY: guaranteed by the caller
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        return USBCTRL_FAILURE;
    };

    let devices = register_c_callback(manager, callback, payload);

    if device_list.is_null() || device_count.is_null() {
        warn!("Empty pointers provided. Won't supply connected devices.");
        return USBCTRL_SUCCESS;
    }

    let (list, count) = device_list_into_raw(devices);
    // SAFETY: both pointers checked non-null, validity guaranteed by the caller
    unsafe {
        *device_list = list;
        *device_count = count;
    }
    USBCTRL_SUCCESS
}

/// Property `key` of device `id` as a NUL-terminated string, null if absent
///
/// # Safety
/// `manager` must be null or a live pointer from [`usbctrl_manager_new`];
/// `key` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_get_property(
    manager: *const UsbctrlManager,
    id: u32,
    key: *const c_char,
) -> *mut c_char {
    // SAFETY: guaranteed by the caller
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        return ptr::null_mut();
    };
    if key.is_null() {
        return ptr::null_mut();
    }
    // SAFETY: non-null, NUL-terminated per the caller contract
    let key = unsafe { CStr::from_ptr(key) };

    property_cstring(manager, id, key).map_or(ptr::null_mut(), CString::into_raw)
}

/// # Safety
/// `value` must be null or a pointer returned by [`usbctrl_get_property`]
/// that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_string_free(value: *mut c_char) {
    if !value.is_null() {
        // SAFETY: guaranteed by the caller
        drop(unsafe { CString::from_raw(value) });
    }
}

/// # Safety
/// `list` and `count` must come from one [`usbctrl_register_callback`] call
/// and not have been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usbctrl_device_list_free(list: *mut u32, count: usize) {
    if !list.is_null() {
        // SAFETY: guaranteed by the caller
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(list, count)) });
    }
}

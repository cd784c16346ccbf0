//! C FFI layer for vrdevice-client.
//!
//! Provides an opaque handle-based API for C/C++ consumers.
//! The generated C header is written to `include/vrdevice.h` by cbindgen.

use crate::client::DeviceClient;
use crate::config::ClientConfig;
use crate::error::LastError;
use crate::types::TrackerState;
use crate::{ProtocolError, Result};
use std::ffi::{c_char, c_int, c_void, CStr};

/// Last error message for C consumers.
static LAST_ERROR: LastError = LastError::new();

/// Opaque client handle for C consumers.
pub struct VrdClient(DeviceClient);

/// Device layout in C-compatible form.
#[repr(C)]
pub struct VrdLayout {
    pub num_trackers: u32,
    pub num_buttons: u32,
    pub num_valuators: u32,
}

/// Tracker state in C-compatible form.
#[repr(C)]
pub struct VrdTracker {
    /// Translation [x, y, z].
    pub translation: [f32; 3],
    /// Quaternion [qx, qy, qz, qw].
    pub rotation: [f32; 4],
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    /// Microseconds.
    pub time_stamp: u32,
}

/// Packet notification callback; runs on the receiver thread.
pub type VrdPacketCallback = extern "C" fn(user_data: *mut c_void);

struct UserData(*mut c_void);

// The C caller promises `user_data` may be used from the receiver thread.
unsafe impl Send for UserData {}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Connect to a device server and run the handshake.
/// Returns NULL on error (check vrd_last_error()).
///
/// # Safety
/// `host` must be a valid null-terminated string, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_connect(host: *const c_char, port: u16) -> *mut VrdClient {
    if host.is_null() {
        return std::ptr::null_mut();
    }
    let host = CStr::from_ptr(host).to_string_lossy().into_owned();

    match DeviceClient::connect((host.as_str(), port), ClientConfig::from_env()) {
        Ok(client) => {
            LAST_ERROR.clear();
            Box::into_raw(Box::new(VrdClient(client)))
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            std::ptr::null_mut()
        }
    }
}

/// Disconnect and free the client.
/// Returns 0 on a clean disconnect, -1 if the session had failed.
///
/// # Safety
/// `client` must be a pointer returned by `vrd_client_connect`, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_disconnect(client: *mut VrdClient) -> c_int {
    if client.is_null() {
        return 0;
    }
    let client = Box::from_raw(client);
    if client.0.is_dead() {
        drop(client);
        return status(Err(ProtocolError::ConnectionDead));
    }
    status(client.0.disconnect())
}

/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_activate(client: *mut VrdClient) -> c_int {
    match client.as_mut() {
        Some(client) => status(client.0.activate()),
        None => -1,
    }
}

/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_deactivate(client: *mut VrdClient) -> c_int {
    match client.as_mut() {
        Some(client) => status(client.0.deactivate()),
        None => -1,
    }
}

/// Poll (or, while streaming, wait for) the next packet.
/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_get_packet(client: *mut VrdClient) -> c_int {
    match client.as_mut() {
        Some(client) => status(client.0.get_packet().map(|_| ())),
        None => -1,
    }
}

/// Start streaming. `callback` may be NULL; it is called with `user_data`
/// on the receiver thread after every packet. Stream failures are reported
/// through vrd_last_error().
///
/// # Safety
/// `client` must be a valid client pointer, or null. `user_data` must stay
/// valid, and be usable from another thread, until the stream stops.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_start_stream(
    client: *mut VrdClient,
    callback: Option<VrdPacketCallback>,
    user_data: *mut c_void,
) -> c_int {
    let Some(client) = client.as_mut() else {
        return -1;
    };
    let user_data = UserData(user_data);
    status(client.0.start_stream(
        move |_| {
            let data = &user_data;
            if let Some(callback) = callback {
                callback(data.0);
            }
        },
        |e| LAST_ERROR.set(&e),
    ))
}

/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_stop_stream(client: *mut VrdClient) -> c_int {
    match client.as_mut() {
        Some(client) => status(client.0.stop_stream()),
        None => -1,
    }
}

/// Negotiated protocol version, or 0 for a null client.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_protocol_version(client: *const VrdClient) -> u32 {
    client.as_ref().map_or(0, |c| c.0.protocol_version())
}

/// # Safety
/// `client` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_layout(client: *const VrdClient, out: *mut VrdLayout) -> c_int {
    let Some(client) = client.as_ref() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }
    let layout = client.0.layout();
    out.write(VrdLayout {
        num_trackers: layout.num_trackers as u32,
        num_buttons: layout.num_buttons as u32,
        num_valuators: layout.num_valuators as u32,
    });
    0
}

/// Number of virtual devices announced by the server.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_num_virtual_devices(client: *const VrdClient) -> c_int {
    client
        .as_ref()
        .map_or(-1, |c| c.0.virtual_devices().len() as c_int)
}

/// Copy tracker `index` from the current snapshot.
/// Returns 0 on success, -1 on error (bad index or null pointer).
///
/// # Safety
/// `client` and `out` must be valid pointers, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_tracker(
    client: *const VrdClient,
    index: u32,
    out: *mut VrdTracker,
) -> c_int {
    let Some(client) = client.as_ref() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }
    let state = client.0.lock_state();
    let tracker = state
        .tracker(index as usize)
        .and_then(|t| Ok((*t, state.time_stamp(index as usize)?)));
    match tracker {
        Ok((t, time_stamp)) => {
            out.write(to_c_tracker(&t, time_stamp));
            0
        }
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

fn to_c_tracker(t: &TrackerState, time_stamp: u32) -> VrdTracker {
    VrdTracker {
        translation: t.position_orientation.translation,
        rotation: t.position_orientation.rotation,
        linear_velocity: t.linear_velocity,
        angular_velocity: t.angular_velocity,
        time_stamp,
    }
}

/// Button state: 1 pressed, 0 released, -1 on error.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_button(client: *const VrdClient, index: u32) -> c_int {
    let Some(client) = client.as_ref() else {
        return -1;
    };
    match client.0.lock_state().button(index as usize) {
        Ok(pressed) => pressed as c_int,
        Err(e) => {
            LAST_ERROR.set(&e);
            -1
        }
    }
}

/// Valuator value; NaN on error.
///
/// # Safety
/// `client` must be a valid client pointer, or null.
#[no_mangle]
pub unsafe extern "C" fn vrd_client_valuator(client: *const VrdClient, index: u32) -> f32 {
    let Some(client) = client.as_ref() else {
        return f32::NAN;
    };
    match client.0.lock_state().valuator(index as usize) {
        Ok(value) => value,
        Err(e) => {
            LAST_ERROR.set(&e);
            f32::NAN
        }
    }
}

/// Get the last error message. Returns NULL if no error.
/// The returned pointer is valid until the next vrdevice API call.
#[no_mangle]
pub extern "C" fn vrd_last_error() -> *const c_char {
    LAST_ERROR.as_ptr()
}

//! FFI bindings for Healthboard
//!
//! C-compatible entry points so a host app can run the dashboard logic. All
//! functions take null-terminated C strings and return allocated strings that
//! must be freed by the caller using `hb_free_string`.

use chrono::NaiveDate;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use crate::config::DashboardConfig;
use crate::dashboard::load_day;
use crate::error::HealthError;
use crate::reconcile::{reconcile_cumulative, SourcePriority, SourcedValue};
use crate::repository::HealthRepository;
use crate::session::HealthSession;
use crate::sleep::SleepSummary;
use crate::store::LocalPlatform;
use crate::types::SleepSessionRecord;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Turn a computation result into a C string, recording any error
fn respond(result: Result<String, HealthError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn reconcile_steps_json(readings: &str, priority: Option<&str>) -> Result<String, HealthError> {
    let readings: Vec<SourcedValue> = serde_json::from_str(readings)?;
    let priority = match priority {
        Some(json) => serde_json::from_str(json)?,
        None => SourcePriority::default(),
    };
    Ok(serde_json::to_string(&reconcile_cumulative(&readings, &priority))?)
}

fn sleep_summary_json(sessions: &str) -> Result<String, HealthError> {
    let sessions: Vec<SleepSessionRecord> = serde_json::from_str(sessions)?;
    Ok(serde_json::to_string(&SleepSummary::from_sessions(&sessions))?)
}

fn day_summary_json(export: &str, date: &str, offset_minutes: i32) -> Result<String, HealthError> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| HealthError::InvalidRange(format!("bad date {date:?}: {e}")))?;
    let config = DashboardConfig {
        utc_offset_minutes: offset_minutes,
        ..DashboardConfig::default()
    };
    config.validate()?;

    let session = HealthSession::new(Arc::new(LocalPlatform::from_export_json(export)?));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let snapshot = runtime.block_on(async {
        let client = session.client().await?;
        let repo = HealthRepository::new(client, config);
        Ok::<_, HealthError>(load_day(&repo, date).await)
    })?;
    Ok(serde_json::to_string(&snapshot)?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Reconcile step readings from several sources into one daily total.
///
/// `readings_json` is an array of `{"origin", "value"}` objects and
/// `priority_json` an array of source ids, highest priority first. A NULL
/// priority uses the built-in source list.
///
/// # Safety
/// - `readings_json` must be a valid null-terminated C string.
/// - `priority_json` must be a valid null-terminated C string or NULL.
/// - Returns a newly allocated string that must be freed with `hb_free_string`.
/// - Returns NULL on error; call `hb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hb_reconcile_steps(
    readings_json: *const c_char,
    priority_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let readings = match cstr_to_string(readings_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid readings string pointer");
            return ptr::null_mut();
        }
    };
    let priority = cstr_to_string(priority_json);

    respond(reconcile_steps_json(&readings, priority.as_deref()))
}

/// Summarize sleep sessions, excluding awake time.
///
/// # Safety
/// - `sessions_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `hb_free_string`.
/// - Returns NULL on error; call `hb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hb_sleep_summary(sessions_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let sessions = match cstr_to_string(sessions_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid sessions string pointer");
            return ptr::null_mut();
        }
    };

    respond(sleep_summary_json(&sessions))
}

/// Load every metric for one day from an export file.
///
/// # Safety
/// - `export_json` and `date` must be valid null-terminated C strings.
/// - Returns a newly allocated string that must be freed with `hb_free_string`.
/// - Returns NULL on error; call `hb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hb_day_summary(
    export_json: *const c_char,
    date: *const c_char,
    offset_minutes: i32,
) -> *mut c_char {
    clear_last_error();

    let export = match cstr_to_string(export_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid export string pointer");
            return ptr::null_mut();
        }
    };

    let date = match cstr_to_string(date) {
        Some(s) => s,
        None => {
            set_last_error("Invalid date string pointer");
            return ptr::null_mut();
        }
    };

    respond(day_summary_json(&export, &date, offset_minutes))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Healthboard functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Healthboard function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn hb_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Healthboard call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn hb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Healthboard library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn hb_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

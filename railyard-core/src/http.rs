//! Route table and reply construction for the controller's web surface.
//!
//! Nothing here touches a socket. The firmware resolves a [`Route`], asks
//! these helpers for a [`Reply`] and copies it onto the wire.

use serde::Serialize;
use std::path::PathBuf;

use crate::clock::Clock;
use crate::controller::{OtaStatus, UpdateController};
use crate::error::OtaError;
use crate::flash::{FlashUpdater, UpdateTarget};
use crate::session::Outcome;
use crate::volume::VolumeDriver;

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";
pub const APPLICATION_JSON: &str = "application/json";
pub const IMAGE_PNG: &str = "image/png";

pub const NOT_FOUND: &str = "404 Not Found";
pub const FILE_NOT_FOUND: &str = "File Not Found";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    InsideHtml,
    InsideImage,
    TrackClick,
    TrackStatus,
    YardClick,
    YardStatus,
    TripleClick,
    TripleStatus,
    MotorSpeed,
    MotorDirection,
    MotorStatus,
    OtaEnable,
    OtaCancel,
    OtaStatus,
    OtaPage,
    UpdateFirmware,
    UpdateFilesystem,
    NotFound,
}

/// One registered path. `method: None` accepts any method.
#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub path: &'static str,
    pub method: Option<Method>,
    pub route: Route,
}

const fn entry(path: &'static str, method: Option<Method>, route: Route) -> RouteEntry {
    RouteEntry {
        path,
        method,
        route,
    }
}

pub const ROUTES: &[RouteEntry] = &[
    entry("/", None, Route::Index),
    entry("/inside.html", None, Route::InsideHtml),
    entry("/inside.png", None, Route::InsideImage),
    entry("/track_click", None, Route::TrackClick),
    entry("/track_status", None, Route::TrackStatus),
    entry("/yard_click", None, Route::YardClick),
    entry("/yard_status", None, Route::YardStatus),
    entry("/triple_status", None, Route::TripleStatus),
    entry("/triple_click", None, Route::TripleClick),
    entry("/motor_speed", None, Route::MotorSpeed),
    entry("/motor_dir", None, Route::MotorDirection),
    entry("/motor_status", None, Route::MotorStatus),
    entry("/ota_enable", Some(Method::Post), Route::OtaEnable),
    entry("/ota_cancel", Some(Method::Post), Route::OtaCancel),
    entry("/ota_status", Some(Method::Get), Route::OtaStatus),
    entry("/ota", Some(Method::Get), Route::OtaPage),
    entry("/update_fw", Some(Method::Post), Route::UpdateFirmware),
    entry("/update_fs", Some(Method::Post), Route::UpdateFilesystem),
];

impl Route {
    /// Exact, case-sensitive match on the path; the query string is ignored.
    pub fn resolve(method: Method, uri: &str) -> Route {
        let path = uri.split('?').next().unwrap_or_default();
        ROUTES
            .iter()
            .find(|e| e.path == path && e.method.map_or(true, |m| m == method))
            .map(|e| e.route)
            .unwrap_or(Route::NotFound)
    }

    pub fn upload_target(self) -> Option<UpdateTarget> {
        match self {
            Route::UpdateFirmware => Some(UpdateTarget::Firmware),
            Route::UpdateFilesystem => Some(UpdateTarget::DataVolume),
            _ => None,
        }
    }

    /// Routes refused with 503 while an update is writing.
    pub fn is_gated(self) -> bool {
        !matches!(
            self,
            Route::OtaEnable
                | Route::OtaCancel
                | Route::OtaStatus
                | Route::OtaPage
                | Route::UpdateFirmware
                | Route::UpdateFilesystem
        )
    }

    /// File on the data volume backing a static route.
    pub fn asset(self) -> Option<(&'static str, &'static str)> {
        match self {
            Route::Index => Some(("/index.html", TEXT_HTML)),
            Route::InsideHtml => Some(("/inside.html", TEXT_HTML)),
            Route::InsideImage => Some(("/inside.png", IMAGE_PNG)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: TEXT_PLAIN,
            body: body.into().into_bytes(),
        }
    }

    pub fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: TEXT_HTML,
            body: body.into_bytes(),
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status: 200,
                content_type: APPLICATION_JSON,
                body,
            },
            Err(e) => Self::text(500, format!("JSON error: {}", e)),
        }
    }

    pub fn error(err: &OtaError) -> Self {
        Self::text(err.status_code().unwrap_or(500), err.to_string())
    }

    pub fn not_found() -> Self {
        Self::text(404, NOT_FOUND)
    }

    pub fn body_text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

/// What to send back: a buffered reply or a file streamed off the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Reply(Reply),
    File {
        path: PathBuf,
        content_type: &'static str,
    },
}

/// 503 for gated routes while a session is writing.
pub fn busy_gate<C, F, V>(route: Route, controller: &UpdateController<C, F, V>) -> Option<Reply>
where
    C: Clock,
    F: FlashUpdater,
    V: VolumeDriver,
{
    if !route.is_gated() {
        return None;
    }
    controller.check_busy().err().map(|e| Reply::error(&e))
}

/// Window endpoints and the upload page. `None` for any other route.
pub fn ota_reply<C, F, V>(route: Route, controller: &mut UpdateController<C, F, V>) -> Option<Reply>
where
    C: Clock,
    F: FlashUpdater,
    V: VolumeDriver,
{
    match route {
        Route::OtaEnable => Some(Reply::json(&controller.open_window())),
        Route::OtaCancel => Some(Reply::json(&controller.cancel_window())),
        Route::OtaStatus => Some(Reply::json(&controller.status())),
        Route::OtaPage => Some(ota_page(controller.status())),
        _ => None,
    }
}

/// Resolves a static route against the data volume.
pub fn serve_asset<C, F, V>(
    route: Route,
    controller: &mut UpdateController<C, F, V>,
) -> Option<Response>
where
    C: Clock,
    F: FlashUpdater,
    V: VolumeDriver,
{
    let (path, content_type) = route.asset()?;
    let response = match controller.resolve_asset(path) {
        Err(e) => Response::Reply(Reply::error(&e)),
        Ok(None) => Response::Reply(Reply::text(404, FILE_NOT_FOUND)),
        Ok(Some(path)) => Response::File { path, content_type },
    };
    Some(response)
}

/// Final reply of an upload request; `None` when the client went away.
pub fn upload_reply(target: UpdateTarget, outcome: &Outcome) -> Option<Reply> {
    match outcome {
        Outcome::Committed(_) => Some(Reply::text(
            200,
            format!("{} update OK. Rebooting...", target.label()),
        )),
        Outcome::Failed { error, .. } => Some(Reply::text(
            500,
            format!("{} update failed: {}", target.label(), error),
        )),
        Outcome::Aborted { reason, .. } | Outcome::Rejected(reason) => {
            reason.status_code().map(|_| Reply::error(reason))
        }
        _ => None,
    }
}

pub fn ota_page(status: OtaStatus) -> Reply {
    if !status.enabled {
        return Reply::error(&OtaError::WindowInactive);
    }
    let state = if status.in_progress {
        "UPLOAD IN PROGRESS"
    } else {
        "Idle"
    };
    Reply::html(format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'>\
<meta name='viewport' content='width=device-width, initial-scale=1'>\
<title>OTA Update</title>\
<style>body{{font-family:Arial;text-align:center;padding:20px;}}\
form{{margin:16px auto;padding:16px;border:1px solid #ccc;border-radius:8px;max-width:520px;}}\
button{{font-size:18px;padding:10px 18px;border:0;border-radius:6px;cursor:pointer;}}\
.btn{{background:#2f6fab;color:#fff;}} .danger{{background:#b33a3a;color:#fff;}}</style>\
</head><body><h1>OTA Update</h1>\
<p><b>Enabled:</b> {secs}s remaining</p><p><b>Status:</b> {state}</p>\
<form method='POST' action='/update_fw' enctype='multipart/form-data'>\
<h2>Firmware (.bin)</h2><input type='file' name='update' accept='.bin' required><br><br>\
<button class='btn' type='submit'>Upload Firmware</button></form>\
<form method='POST' action='/update_fs' enctype='multipart/form-data'>\
<h2>Filesystem image</h2><input type='file' name='update' required><br><br>\
<button class='btn' type='submit'>Upload Filesystem</button></form>\
<form method='POST' action='/ota_cancel'>\
<button class='danger' type='submit'>Cancel OTA Now</button></form>\
<p><a href='/'>Back to index</a></p></body></html>",
        secs = status.seconds_left,
        state = state,
    ))
}

/// Decoded value of `key` in the query string of `uri`.
pub fn query_param(uri: &str, key: &str) -> Option<String> {
    let (_, query) = uri.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (url_decode(k) == key).then(|| url_decode(v))
    })
}

/// Lenient integer parse: optional sign and leading digits, 0 otherwise.
pub fn parse_int(value: &str) -> i64 {
    let value = value.trim_start();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add(i64::from(d - b'0'))
        });
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn url_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

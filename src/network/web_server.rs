use anyhow::{anyhow, Result};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::i2c::I2cDriver;
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Method, Request};
use esp_idf_svc::io::{Read, Write};
use railyard_core::http::{
    busy_gate, ota_reply, serve_asset, Reply, Response, Route, FILE_NOT_FOUND, ROUTES,
};
use railyard_core::railway::Railway;
use railyard_core::{BodyUpload, OtaError, UpdateController, UpdateTarget, UploadRequest};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::hardware::LedcMotor;
use crate::ota::EspFlashUpdater;
use crate::system::{EspClock, LittleFsVolume};

pub type Controller = UpdateController<EspClock, EspFlashUpdater, LittleFsVolume>;
pub type SharedController = Arc<Mutex<Controller>>;
pub type SharedRailway = Arc<Mutex<Railway<I2cDriver<'static>, LedcMotor<'static>>>>;

const UPLOAD_READ_SIZE: usize = 4096;
const FILE_CHUNK_SIZE: usize = 1024;

type HttpRequest<'a, 'r> = Request<&'a mut EspHttpConnection<'r>>;

fn server_config() -> Configuration {
    Configuration {
        stack_size: 10240,
        max_uri_handlers: 40,
        max_open_sockets: 6,
        uri_match_wildcard: true,
        lru_purge_enable: true,
        ..Default::default()
    }
}

/// State every handler needs; cloned into each registered closure.
#[derive(Clone)]
struct Handlers {
    controller: SharedController,
    railway: SharedRailway,
    upload_field: Arc<str>,
}

pub struct RailyardServer {
    _server: EspHttpServer<'static>,
}

impl RailyardServer {
    pub fn new(
        controller: SharedController,
        railway: SharedRailway,
        upload_field: &str,
    ) -> Result<Self> {
        let mut server = EspHttpServer::new(&server_config())?;
        let handlers = Handlers {
            controller,
            railway,
            upload_field: Arc::from(upload_field),
        };

        for entry in ROUTES {
            let methods = match entry.method {
                Some(method) => vec![method],
                None => vec![
                    railyard_core::http::Method::Get,
                    railyard_core::http::Method::Post,
                ],
            };
            for method in methods {
                let h = handlers.clone();
                let route = Route::resolve(method, entry.path);
                server.fn_handler(entry.path, esp_method(method), move |req| h.handle(req, route))?;
            }
        }

        // Registered last so every exact path wins
        for method in [Method::Get, Method::Post] {
            let h = handlers.clone();
            server.fn_handler("/*", method, move |req| h.handle(req, Route::NotFound))?;
        }

        log::info!("Web server started with {} routes", ROUTES.len());
        Ok(Self { _server: server })
    }
}

fn esp_method(method: railyard_core::http::Method) -> Method {
    match method {
        railyard_core::http::Method::Post => Method::Post,
        _ => Method::Get,
    }
}

impl Handlers {
    fn controller(&self) -> Result<MutexGuard<'_, Controller>> {
        self.controller
            .lock()
            .map_err(|_| anyhow!("update controller lock poisoned"))
    }

    fn handle(&self, req: HttpRequest<'_, '_>, route: Route) -> Result<()> {
        let uri = req.uri().to_string();
        log::debug!("{:?} {}", route, uri);

        let gate = busy_gate(route, &*self.controller()?);
        if let Some(reply) = gate {
            return send(req, &reply, false);
        }

        if let Some(target) = route.upload_target() {
            return self.upload(req, target);
        }

        let ota = ota_reply(route, &mut *self.controller()?);
        if let Some(reply) = ota {
            return send(req, &reply, false);
        }

        {
            // Held while streaming so the volume cannot be unmounted underneath
            let mut ctrl = self.controller()?;
            match serve_asset(route, &mut ctrl) {
                Some(Response::File { path, content_type }) => {
                    return stream_file(req, &path, content_type)
                }
                Some(Response::Reply(reply)) => return send(req, &reply, false),
                None => {}
            }
        }

        let reply = {
            let mut railway = self
                .railway
                .lock()
                .map_err(|_| anyhow!("railway lock poisoned"))?;
            railway.handle(route, &uri, &mut FreeRtos)
        };
        send(req, &reply.unwrap_or_else(Reply::not_found), false)
    }

    fn upload(&self, mut req: HttpRequest<'_, '_>, target: UpdateTarget) -> Result<()> {
        let content_length = req.header("Content-Length").and_then(|v| v.parse::<u64>().ok());
        let content_type = req.header("Content-Type").unwrap_or_default().to_string();

        let id = self.controller()?.begin_request();
        let request = UploadRequest::new(id, target, content_length);
        let mut body = match BodyUpload::new(request, &content_type, &self.upload_field) {
            Ok(body) => body,
            Err(e) => {
                let reply = if self.controller()?.window_active() {
                    Reply::text(400, e.to_string())
                } else {
                    Reply::error(&OtaError::WindowInactive)
                };
                return send(req, &reply, true);
            }
        };

        let mut buffer = vec![0u8; UPLOAD_READ_SIZE];
        let mut total_read = 0usize;
        while !body.is_decided() {
            match req.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    total_read += n;
                    let mut ctrl = self.controller()?;
                    body.push(&mut ctrl, &buffer[..n]);
                }
                Err(e) => {
                    log::warn!("OTA {}: read failed after {} bytes: {:?}", target, total_read, e);
                    body.abandon(&mut *self.controller()?);
                    break;
                }
            }
        }

        let reply = body.finish(&mut *self.controller()?);
        match reply {
            Some(reply) => send(req, &reply, true),
            None => {
                log::warn!("OTA {}: client gone, no reply sent", target);
                Ok(())
            }
        }
    }
}

fn send(req: HttpRequest<'_, '_>, reply: &Reply, close: bool) -> Result<()> {
    let mut headers = vec![("Content-Type", reply.content_type)];
    if close {
        headers.push(("Connection", "close"));
    }
    let mut response = req.into_response(reply.status, None, &headers)?;
    response.write_all(&reply.body)?;
    Ok(())
}

fn stream_file(req: HttpRequest<'_, '_>, path: &Path, content_type: &str) -> Result<()> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::warn!("Cannot open {}: {}", path.display(), e);
            return send(req, &Reply::text(404, FILE_NOT_FOUND), false);
        }
    };

    let mut response = req.into_response(200, None, &[("Content-Type", content_type)])?;
    let mut chunk = [0u8; FILE_CHUNK_SIZE];
    loop {
        let n = std::io::Read::read(&mut file, &mut chunk)?;
        if n == 0 {
            break;
        }
        response.write_all(&chunk[..n])?;
    }
    Ok(())
}

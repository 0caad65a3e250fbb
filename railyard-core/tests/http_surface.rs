//! Route gating and full multipart uploads against the controller.

mod common;

use common::{booted, multipart_body};
use proptest::prelude::*;
use railyard_core::http::{busy_gate, ota_reply, serve_asset, Method, Response, Route, ROUTES};
use railyard_core::{BodyUpload, UpdateTarget, UploadEvent, UploadRequest};

const CONTENT_TYPE: &str = "multipart/form-data; boundary=----WebKitFormBoundary7MA4YWxkTrZu0gW";
const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

#[test]
fn every_non_update_route_is_503_while_writing() {
    let (mut ctrl, _) = booted();
    ctrl.open_window();
    let id = ctrl.begin_request();
    ctrl.handle_upload(
        id,
        UploadEvent::Start {
            target: UpdateTarget::DataVolume,
            filename: "littlefs.bin",
        },
    );

    for entry in ROUTES {
        let method = entry.method.unwrap_or(Method::Get);
        let route = Route::resolve(method, entry.path);
        assert_eq!(route, entry.route);
        match busy_gate(route, &ctrl) {
            Some(reply) => {
                assert!(route.is_gated(), "{} gated", entry.path);
                assert_eq!(reply.status, 503);
            }
            None => assert!(!route.is_gated(), "{} should be gated", entry.path),
        }
    }
    let unknown = Route::resolve(Method::Get, "/favicon.ico");
    assert_eq!(busy_gate(unknown, &ctrl).map(|r| r.status), Some(503));

    // Status endpoints keep answering
    let status = ota_reply(Route::OtaStatus, &mut ctrl).unwrap();
    assert!(status.body_text().contains(r#""in_progress":true"#));
}

#[test]
fn unknown_route_is_404_when_idle() {
    let (ctrl, _) = booted();
    let route = Route::resolve(Method::Get, "/favicon.ico");
    assert_eq!(route, Route::NotFound);
    assert_eq!(busy_gate(route, &ctrl), None);
}

#[test]
fn assets_resolve_on_the_volume() {
    let (mut ctrl, _) = booted();
    match serve_asset(Route::InsideImage, &mut ctrl) {
        Some(Response::File { path, content_type }) => {
            assert_eq!(path, std::path::PathBuf::from("/littlefs/inside.png"));
            assert_eq!(content_type, "image/png");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn second_upload_gets_503_and_does_not_disturb_first() {
    let (mut ctrl, _) = booted();
    ctrl.open_window();
    let first_body = multipart_body(BOUNDARY, "update", "fw.bin", &[0xAB; 10_000]);
    let second_body = multipart_body(BOUNDARY, "update", "fs.bin", &[0xCD; 500]);

    let id = ctrl.begin_request();
    let mut first =
        BodyUpload::new(UploadRequest::new(id, UpdateTarget::Firmware, None), CONTENT_TYPE, "update")
            .unwrap();
    let id = ctrl.begin_request();
    let mut second =
        BodyUpload::new(UploadRequest::new(id, UpdateTarget::DataVolume, None), CONTENT_TYPE, "update")
            .unwrap();

    first.push(&mut ctrl, &first_body[..4096]);
    second.push(&mut ctrl, &second_body);
    assert!(second.is_decided());
    let refused = second.finish(&mut ctrl).unwrap();
    assert_eq!(refused.status, 503);
    assert!(ctrl.volume().is_mounted());

    for piece in first_body[4096..].chunks(4096) {
        first.push(&mut ctrl, piece);
    }
    let reply = first.finish(&mut ctrl).unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(
        ctrl.flash().commits,
        vec![(UpdateTarget::Firmware, vec![0xAB; 10_000])]
    );
}

proptest! {
    #[test]
    fn upload_result_independent_of_read_sizes(
        payload in proptest::collection::vec(any::<u8>(), 0..8192),
        read_size in 1usize..5000,
    ) {
        let (mut ctrl, _) = booted();
        ctrl.open_window();
        let raw = multipart_body(BOUNDARY, "update", "littlefs.bin", &payload);
        let id = ctrl.begin_request();
        let mut upload = BodyUpload::new(
            UploadRequest::new(id, UpdateTarget::DataVolume, Some(raw.len() as u64)),
            CONTENT_TYPE,
            "update",
        )
        .unwrap();
        for piece in raw.chunks(read_size) {
            upload.push(&mut ctrl, piece);
        }
        let reply = upload.finish(&mut ctrl).unwrap();
        prop_assert_eq!(reply.body_text(), "Filesystem update OK. Rebooting...");
        prop_assert_eq!(
            &ctrl.flash().commits,
            &vec![(UpdateTarget::DataVolume, payload)]
        );
    }
}

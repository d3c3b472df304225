// Resource lifecycle integration tests for Strata
//
// Every entity owns the listeners it attached; destroying the entity must
// leave nothing behind on the event bus.

use strata::backend::headless::HeadlessBackend;
use strata::backend::{Mode, OutputHandle, OutputLayout};
use strata::client::Rectangle;
use strata::events::ShellKind;
use strata::input::DeviceKind;
use strata::output::LayerShellLayer;
use strata::{Event, EventSource, Server, StrataConfig};

/// Listeners attached by `Server::new` on the global sources
const GLOBAL_LISTENERS: usize = 16;

fn server_with_output() -> (Server<HeadlessBackend>, OutputHandle) {
    let mut backend = HeadlessBackend::new();
    let output = backend.add_output("OUT-1", Mode::new(1280, 720, 60_000));
    let mut server = Server::new(StrataConfig::default(), backend).unwrap();
    server.dispatch(Event::NewOutput { output }).unwrap();
    (server, output)
}

#[test]
fn test_global_listeners_are_attached_once() {
    let server = Server::new(StrataConfig::default(), HeadlessBackend::new()).unwrap();
    assert_eq!(server.total_listeners(), GLOBAL_LISTENERS);
    assert_eq!(server.listener_count(EventSource::Backend), 2);
    assert_eq!(server.listener_count(EventSource::Cursor), 5);
    assert_eq!(server.listener_count(EventSource::Seat), 2);
}

#[test]
fn test_output_listeners_die_with_output() {
    let (mut server, output) = server_with_output();
    assert_eq!(server.listener_count(EventSource::Output(output)), 3);

    server.backend_mut().remove_output(output);
    server.dispatch(Event::OutputDestroy { output }).unwrap();
    assert_eq!(server.listener_count(EventSource::Output(output)), 0);
    assert_eq!(server.total_listeners(), GLOBAL_LISTENERS);

    // a late frame for the dead output reaches nobody
    server.dispatch(Event::OutputFrame { output }).unwrap();
}

#[test]
fn test_device_listeners_die_with_device() {
    let (mut server, _) = server_with_output();
    let keyboard = server.backend_mut().new_device();
    let pointer = server.backend_mut().new_device();
    server
        .dispatch(Event::NewInput {
            device: keyboard,
            kind: DeviceKind::Keyboard,
            name: "kbd".into(),
        })
        .unwrap();
    server
        .dispatch(Event::NewInput {
            device: pointer,
            kind: DeviceKind::Pointer,
            name: "mouse".into(),
        })
        .unwrap();
    // destroy, key, modifiers
    assert_eq!(server.listener_count(EventSource::Device(keyboard)), 3);
    assert_eq!(server.listener_count(EventSource::Device(pointer)), 1);

    server.dispatch(Event::InputDestroy { device: keyboard }).unwrap();
    server.dispatch(Event::InputDestroy { device: pointer }).unwrap();
    assert_eq!(server.listener_count(EventSource::Device(keyboard)), 0);
    assert_eq!(server.listener_count(EventSource::Device(pointer)), 0);
    assert!(server.registry().inputs.is_empty());

    // destroying twice is harmless
    server.dispatch(Event::InputDestroy { device: keyboard }).unwrap();
}

#[test]
fn test_surface_listeners_die_with_surface() {
    let (mut server, output) = server_with_output();
    let toplevel = server.backend_mut().new_surface();
    let layer = server.backend_mut().new_surface();
    server
        .dispatch(Event::NewToplevel {
            surface: toplevel,
            shell: ShellKind::X11,
        })
        .unwrap();
    server
        .dispatch(Event::NewLayerSurface {
            surface: layer,
            output: Some(output),
            layer: LayerShellLayer::Background,
            namespace: "wallpaper".into(),
        })
        .unwrap();
    assert_eq!(server.listener_count(EventSource::Surface(toplevel)), 4);
    assert_eq!(server.listener_count(EventSource::Surface(layer)), 3);

    for surface in [toplevel, layer] {
        server
            .dispatch(Event::SurfaceMap {
                surface,
                geometry: Rectangle::new(0, 0, 640, 480),
                title: "x".into(),
                app_id: "x".into(),
            })
            .unwrap();
    }
    assert_eq!(server.registry().clients.len(), 1);
    let nodes = server.backend().node_count();
    assert_eq!(nodes, 2);

    // destroying a mapped surface unmaps it first
    server.dispatch(Event::SurfaceDestroy { surface: toplevel }).unwrap();
    server.dispatch(Event::SurfaceDestroy { surface: layer }).unwrap();
    assert!(server.registry().clients.is_empty());
    assert_eq!(server.focused_client(), None);
    assert_eq!(server.backend().node_count(), 0);
    assert_eq!(server.listener_count(EventSource::Surface(toplevel)), 0);
    assert_eq!(server.listener_count(EventSource::Surface(layer)), 0);
}

#[test]
fn test_unmap_keeps_surface_listeners() {
    let (mut server, _) = server_with_output();
    let surface = server.backend_mut().new_surface();
    server
        .dispatch(Event::NewToplevel {
            surface,
            shell: ShellKind::Xdg,
        })
        .unwrap();
    server
        .dispatch(Event::SurfaceMap {
            surface,
            geometry: Rectangle::new(0, 0, 100, 100),
            title: String::new(),
            app_id: String::new(),
        })
        .unwrap();
    server.dispatch(Event::SurfaceUnmap { surface }).unwrap();
    assert!(server.registry().clients.is_empty());
    assert_eq!(server.listener_count(EventSource::Surface(surface)), 4);

    // it may map again
    server
        .dispatch(Event::SurfaceMap {
            surface,
            geometry: Rectangle::new(0, 0, 100, 100),
            title: String::new(),
            app_id: String::new(),
        })
        .unwrap();
    assert_eq!(server.registry().clients.len(), 1);
}

#[test]
fn test_cleanup_releases_everything() {
    let (mut server, output) = server_with_output();
    let keyboard = server.backend_mut().new_device();
    server
        .dispatch(Event::NewInput {
            device: keyboard,
            kind: DeviceKind::Keyboard,
            name: "kbd".into(),
        })
        .unwrap();
    let surface = server.backend_mut().new_surface();
    server
        .dispatch(Event::NewToplevel {
            surface,
            shell: ShellKind::Xdg,
        })
        .unwrap();
    server
        .dispatch(Event::SurfaceMap {
            surface,
            geometry: Rectangle::new(0, 0, 100, 100),
            title: String::new(),
            app_id: String::new(),
        })
        .unwrap();
    assert!(server.total_listeners() > GLOBAL_LISTENERS);

    server.cleanup();
    assert_eq!(server.total_listeners(), 0);
    assert!(server.registry().outputs.is_empty());
    assert!(server.registry().clients.is_empty());
    assert!(server.registry().inputs.is_empty());
    assert_eq!(server.current_output(), None);
    assert_eq!(server.backend().node_count(), 0);
    assert!(server.backend().layout_box(output).is_empty());

    // nothing reacts any more
    server.dispatch(Event::NewOutput { output }).unwrap();
    assert!(server.registry().outputs.is_empty());
}

#[test]
fn test_status_subscribers_die_with_output() {
    let (mut server, output) = server_with_output();
    let id = server.registry().output_by_handle(output).unwrap();
    server
        .status_mut()
        .bind(id, Box::new(strata::ipc::CollectingSink::new()));
    assert!(server.status_mut().has_subscribers(id));

    server.backend_mut().remove_output(output);
    server.dispatch(Event::OutputDestroy { output }).unwrap();
    assert!(!server.status_mut().has_subscribers(id));
}

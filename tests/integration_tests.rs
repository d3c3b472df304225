//! Integration tests for the Strata core
//!
//! These tests drive a [`Server`] on the headless backend purely through
//! events and check what the backend was told to do.

use anyhow::Result;

use strata::backend::headless::HeadlessBackend;
use strata::backend::{
    ButtonState, Cursor, DeviceHandle, Mode, OutputHandle, OutputLayout, SeatClient, SurfaceHandle,
};
use strata::client::Rectangle;
use strata::config::DecorationMode;
use strata::error::{BackendError, CoreError, LayoutError, OutputConfigError};
use strata::events::ShellKind;
use strata::input::cursor::{CursorMode, BTN_LEFT, BTN_RIGHT};
use strata::input::keyboard::{KeyState, KeyboardLayout, KeyboardModifiers, Keysym, KeysymTable, Modifiers};
use strata::input::{CompositorAction, DeviceKind, SeatCapabilities};
use strata::ipc::CollectingSink;
use strata::output::{HeadConfig, LayerShellLayer, OutputConfiguration};
use strata::{ClientId, Event, OutputId, Server, StrataConfig, TagMask};

// evdev keycodes
const KEY_1: u32 = 2;
const KEY_2: u32 = 3;
const KEY_Q: u32 = 16;
const KEY_A: u32 = 30;

fn test_layout() -> KeysymTable {
    let sym = |name: &str| Keysym::from_name(name).unwrap();
    KeysymTable::new()
        .with_key(KEY_1, sym("1"))
        .with_key(KEY_2, sym("2"))
        .with_key(KEY_Q, sym("q"))
        .with_key(KEY_A, sym("a"))
}

struct Harness {
    server: Server<HeadlessBackend>,
    outputs: Vec<(OutputHandle, OutputId)>,
    keyboard: DeviceHandle,
    pointer: DeviceHandle,
}

impl Harness {
    fn new(output_count: usize) -> Result<Self> {
        Self::with_config(output_count, StrataConfig::default())
    }

    fn with_config(output_count: usize, config: StrataConfig) -> Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut backend =
            HeadlessBackend::new().with_layout_factory(|_| {
                Ok(Box::new(test_layout()) as Box<dyn KeyboardLayout>)
            });
        let handles: Vec<_> = (0..output_count)
            .map(|i| backend.add_output(&format!("OUT-{}", i + 1), Mode::new(1000, 800, 60_000)))
            .collect();
        let keyboard = backend.new_device();
        let pointer = backend.new_device();

        let mut server = Server::new(config, backend)?;
        for &output in &handles {
            server.dispatch(Event::NewOutput { output })?;
        }
        server.dispatch(Event::NewInput {
            device: keyboard,
            kind: DeviceKind::Keyboard,
            name: "kbd".into(),
        })?;
        server.dispatch(Event::NewInput {
            device: pointer,
            kind: DeviceKind::Pointer,
            name: "mouse".into(),
        })?;
        server.start();

        let outputs = handles
            .into_iter()
            .map(|handle| (handle, server.registry().output_by_handle(handle).unwrap()))
            .collect();
        Ok(Self {
            server,
            outputs,
            keyboard,
            pointer,
        })
    }

    fn output(&self, index: usize) -> OutputId {
        self.outputs[index].1
    }

    fn map(&mut self, app_id: &str, geometry: Rectangle) -> Result<(ClientId, SurfaceHandle)> {
        let surface = self.server.backend_mut().new_surface();
        self.server.dispatch(Event::NewToplevel {
            surface,
            shell: ShellKind::Xdg,
        })?;
        self.server.dispatch(Event::SurfaceMap {
            surface,
            geometry,
            title: format!("{} title", app_id),
            app_id: app_id.to_string(),
        })?;
        let id = self.server.registry().client_by_surface(surface).unwrap();
        Ok((id, surface))
    }

    fn hold(&mut self, mods: Modifiers) -> Result<()> {
        self.server.dispatch(Event::KeyboardModifiers {
            device: self.keyboard,
            modifiers: KeyboardModifiers::with_depressed(mods),
        })?;
        Ok(())
    }

    fn press(&mut self, keycode: u32) -> Result<()> {
        self.server.dispatch(Event::KeyboardKey {
            device: self.keyboard,
            time_msec: 0,
            keycode,
            state: KeyState::Pressed,
        })?;
        self.server.dispatch(Event::KeyboardKey {
            device: self.keyboard,
            time_msec: 1,
            keycode,
            state: KeyState::Released,
        })?;
        Ok(())
    }

    fn move_pointer(&mut self, dx: f64, dy: f64) -> Result<()> {
        self.server.dispatch(Event::PointerMotion {
            device: self.pointer,
            time_msec: 0,
            dx,
            dy,
        })?;
        Ok(())
    }

    fn button(&mut self, button: u32, state: ButtonState) -> Result<()> {
        self.server.dispatch(Event::PointerButton {
            device: self.pointer,
            time_msec: 0,
            button,
            state,
        })?;
        Ok(())
    }

    fn shown(&self, surface: SurfaceHandle) -> bool {
        self.server.backend().is_surface_shown(surface)
    }

    fn tags_of(&self, id: ClientId) -> TagMask {
        self.server.registry().clients.get(id).unwrap().tags
    }
}

fn window() -> Rectangle {
    Rectangle::new(10, 10, 200, 100)
}

#[test]
fn test_two_outputs_three_clients_tag_scenario() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (a, b) = (h.output(0), h.output(1));
    assert!(h.server.set_current_tag(b, 1));
    assert_eq!(h.server.current_output(), Some(a));

    let (c1, s1) = h.map("one", window())?;
    let (c2, s2) = h.map("two", window())?;
    // Super+Alt+2 sends the focused client to tag 2
    h.hold(Modifiers::LOGO | Modifiers::ALT)?;
    h.press(KEY_2)?;
    h.hold(Modifiers::empty())?;
    let (c3, s3) = h.map("three", window())?;

    assert_eq!(h.tags_of(c1), TagMask::mask_of(0));
    assert_eq!(h.tags_of(c2), TagMask::mask_of(1));
    assert_eq!(h.tags_of(c3), TagMask::mask_of(0));
    assert!(h.shown(s1) && h.shown(s3));
    assert!(!h.shown(s2));
    assert_eq!(h.server.focused_client(), Some(c3));
    // B shows tag 2 but c2 belongs to A
    assert_eq!(h.server.registry().clients_on(b).count(), 0);

    let status = h.server.snapshot(a).unwrap();
    assert_eq!(status.output, "OUT-1");
    assert!(status.selected);
    assert!(status.tags[0].active && !status.tags[1].active);
    assert_eq!(status.tags[0].clients, 2);
    assert_eq!(status.tags[1].clients, 1);
    assert!(status.tags[0].focused);
    assert_eq!(status.app_id, "three");

    // Super+2 shows tag 2 on A
    h.hold(Modifiers::LOGO)?;
    h.press(KEY_2)?;
    assert!(h.shown(s2));
    assert!(!h.shown(s1) && !h.shown(s3));
    assert_eq!(h.server.focused_client(), Some(c2));

    let status = h.server.snapshot(b).unwrap();
    assert!(!status.selected);
    assert!(status.tags[1].active);
    assert_eq!(status.title, "");
    Ok(())
}

#[test]
fn test_bound_keys_are_consumed_and_others_forwarded() -> Result<()> {
    let mut h = Harness::new(1)?;
    h.hold(Modifiers::LOGO)?;
    h.press(KEY_2)?;
    assert_eq!(
        h.server.registry().outputs.get(h.output(0)).unwrap().cur_tag,
        TagMask::mask_of(1)
    );
    // only the release reached the client
    let keys: Vec<_> = h.server.backend().seat().keys.iter().map(|k| (k.1, k.2)).collect();
    assert_eq!(keys, vec![(KEY_2, KeyState::Released)]);

    h.press(KEY_A)?;
    let forwarded = &h.server.backend().seat().keys;
    assert_eq!(forwarded.len(), 3);
    assert_eq!(forwarded[1].1, KEY_A);
    assert_eq!(
        h.server.backend().seat().modifiers.last(),
        Some(&KeyboardModifiers::with_depressed(Modifiers::LOGO))
    );
    Ok(())
}

#[test]
fn test_quit_binding_stops_server() -> Result<()> {
    let mut h = Harness::new(1)?;
    assert!(h.server.is_running());
    h.hold(Modifiers::LOGO | Modifiers::SHIFT)?;
    h.press(KEY_Q)?;
    assert!(!h.server.is_running());
    assert!(h.server.backend().is_terminated());
    Ok(())
}

#[test]
fn test_keymap_failure_forwards_every_key() -> Result<()> {
    let mut backend = HeadlessBackend::new()
        .with_layout_factory(|_| Err(BackendError::Keymap("no such layout".into())));
    let keyboard = backend.new_device();
    let mut server = Server::new(StrataConfig::default(), backend)?;
    server.dispatch(Event::NewInput {
        device: keyboard,
        kind: DeviceKind::Keyboard,
        name: "broken".into(),
    })?;
    let input = server.registry().find_by_device(keyboard).unwrap();
    assert!(!input.keyboard.as_ref().unwrap().has_layout());
    assert_eq!(server.capabilities(), SeatCapabilities::KEYBOARD);

    server.dispatch(Event::KeyboardKey {
        device: keyboard,
        time_msec: 5,
        keycode: KEY_Q,
        state: KeyState::Pressed,
    })?;
    assert_eq!(server.backend().seat().keys, vec![(5, KEY_Q, KeyState::Pressed)]);
    Ok(())
}

#[test]
fn test_capabilities_follow_devices() -> Result<()> {
    let mut h = Harness::new(1)?;
    assert_eq!(
        h.server.capabilities(),
        SeatCapabilities::KEYBOARD | SeatCapabilities::POINTER
    );
    assert_eq!(h.server.backend().seat().capabilities, h.server.capabilities());
    assert_eq!(h.server.backend().cursor_devices(), &[h.pointer]);

    let touch = h.server.backend_mut().new_device();
    h.server.dispatch(Event::NewInput {
        device: touch,
        kind: DeviceKind::Touch,
        name: "screen".into(),
    })?;
    // only keyboards and pointers are advertised
    assert_eq!(
        h.server.capabilities(),
        SeatCapabilities::KEYBOARD | SeatCapabilities::POINTER
    );

    let second_keyboard = h.server.backend_mut().new_device();
    h.server.dispatch(Event::NewInput {
        device: second_keyboard,
        kind: DeviceKind::Keyboard,
        name: "kbd2".into(),
    })?;
    h.server.dispatch(Event::InputDestroy { device: h.keyboard })?;
    assert!(h.server.capabilities().contains(SeatCapabilities::KEYBOARD));
    h.server.dispatch(Event::InputDestroy { device: second_keyboard })?;
    assert_eq!(h.server.capabilities(), SeatCapabilities::POINTER);
    h.server.dispatch(Event::InputDestroy { device: h.pointer })?;
    h.server.dispatch(Event::InputDestroy { device: touch })?;
    assert_eq!(h.server.capabilities(), SeatCapabilities::empty());
    assert_eq!(h.server.backend().seat().capabilities, SeatCapabilities::empty());
    Ok(())
}

#[test]
fn test_keyboard_settings_applied_to_new_keyboards() -> Result<()> {
    let h = Harness::new(1)?;
    let keyboard = h.server.backend().keyboard(h.keyboard).unwrap();
    assert_eq!(keyboard.repeat, Some((25, 600)));
    assert_eq!(h.server.backend().seat().keyboard, Some(h.keyboard));
    Ok(())
}

#[test]
fn test_interactive_move() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (id, _) = h.map("term", window())?;

    h.move_pointer(50.0, 40.0)?;
    h.hold(Modifiers::ALT)?;
    h.button(BTN_LEFT, ButtonState::Pressed)?;
    assert!(matches!(h.server.cursor().mode(), CursorMode::Move(_)));
    assert_eq!(h.server.backend().cursor_image(), Some("fleur"));

    h.move_pointer(100.0, 60.0)?;
    let geom = h.server.registry().clients.get(id).unwrap().geom;
    assert_eq!((geom.x, geom.y), (110, 70));
    assert_eq!((geom.width, geom.height), (200, 100));
    let node = h.server.registry().clients.get(id).unwrap().node;
    assert_eq!(h.server.backend().node(node).unwrap().position, (110, 70));

    h.button(BTN_LEFT, ButtonState::Released)?;
    assert!(h.server.cursor().is_passthrough());
    h.move_pointer(10.0, 10.0)?;
    assert_eq!(h.server.registry().clients.get(id).unwrap().geom.x, 110);
    Ok(())
}

#[test]
fn test_interactive_resize_from_bottom_right() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (id, surface) = h.map("term", window())?;

    // lower right quadrant of the window
    h.move_pointer(180.0, 90.0)?;
    h.hold(Modifiers::ALT)?;
    h.button(BTN_RIGHT, ButtonState::Pressed)?;
    assert!(matches!(h.server.cursor().mode(), CursorMode::Resize(_)));
    assert_eq!(h.server.backend().cursor_image(), Some("bottom_right_corner"));

    h.move_pointer(40.0, 20.0)?;
    let geom = h.server.registry().clients.get(id).unwrap().geom;
    assert_eq!(geom, Rectangle::new(10, 10, 240, 120));
    assert_eq!(h.server.backend().toplevel(surface).unwrap().size, Some((240, 120)));

    h.button(BTN_RIGHT, ButtonState::Released)?;
    assert!(h.server.cursor().is_passthrough());
    Ok(())
}

#[test]
fn test_release_of_any_button_ends_grab() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (id, _) = h.map("term", window())?;

    h.move_pointer(50.0, 40.0)?;
    h.hold(Modifiers::ALT)?;
    h.button(BTN_LEFT, ButtonState::Pressed)?;
    assert_eq!(h.server.cursor().grabbed_client(), Some(id));

    h.button(BTN_RIGHT, ButtonState::Released)?;
    assert!(h.server.cursor().is_passthrough());
    assert_eq!(h.server.cursor().grabbed_client(), None);
    Ok(())
}

#[test]
fn test_unmap_clears_grab() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (id, surface) = h.map("term", window())?;

    h.move_pointer(50.0, 40.0)?;
    h.hold(Modifiers::ALT)?;
    h.button(BTN_RIGHT, ButtonState::Pressed)?;
    assert_eq!(h.server.cursor().grabbed_client(), Some(id));

    h.server.dispatch(Event::SurfaceUnmap { surface })?;
    assert_eq!(h.server.cursor().grabbed_client(), None);
    assert!(h.server.cursor().is_passthrough());

    // motion after the client is gone touches nothing
    h.move_pointer(30.0, 30.0)?;
    assert!(h.server.registry().clients.is_empty());
    Ok(())
}

#[test]
fn test_resize_of_huge_client() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (id, _) = h.map("huge", Rectangle::new(10, 0, i32::MAX, 100))?;

    h.move_pointer(50.0, 40.0)?;
    assert_eq!(h.server.focused_client(), Some(id));
    h.hold(Modifiers::ALT)?;
    h.button(BTN_RIGHT, ButtonState::Pressed)?;
    assert_eq!(h.server.backend().cursor_image(), Some("top_left_corner"));

    h.move_pointer(-20.0, 10.0)?;
    let geom = h.server.registry().clients.get(id).unwrap().geom;
    assert_eq!((geom.x, geom.y), (-10, 10));
    assert_eq!((geom.width, geom.height), (i32::MAX, 90));
    h.button(BTN_RIGHT, ButtonState::Released)?;
    Ok(())
}

#[test]
fn test_plain_click_focuses_and_raises() -> Result<()> {
    let mut config = StrataConfig::default();
    config.general.sloppy_focus = false;
    let mut h = Harness::with_config(1, config)?;
    let (below, below_surface) = h.map("below", Rectangle::new(0, 0, 300, 300))?;
    let (above, _) = h.map("above", Rectangle::new(400, 0, 300, 300))?;
    assert_eq!(h.server.focused_client(), Some(above));

    h.move_pointer(50.0, 50.0)?;
    // no sloppy focus
    assert_eq!(h.server.focused_client(), Some(above));
    assert_eq!(h.server.backend().seat().pointer_focus, Some(below_surface));

    h.button(BTN_LEFT, ButtonState::Pressed)?;
    assert_eq!(h.server.focused_client(), Some(below));
    assert!(h.server.cursor().is_passthrough());
    assert!(h.server.backend().toplevel(below_surface).unwrap().activated);
    assert_eq!(h.server.backend().seat().keyboard_focus, Some(below_surface));
    Ok(())
}

#[test]
fn test_sloppy_focus_follows_pointer() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (left, _) = h.map("left", Rectangle::new(0, 0, 300, 300))?;
    let (right, _) = h.map("right", Rectangle::new(400, 0, 300, 300))?;
    assert_eq!(h.server.focused_client(), Some(right));

    h.move_pointer(50.0, 50.0)?;
    assert_eq!(h.server.focused_client(), Some(left));
    h.move_pointer(400.0, 0.0)?;
    assert_eq!(h.server.focused_client(), Some(right));

    // empty desktop clears pointer focus but keeps keyboard focus
    h.move_pointer(0.0, 500.0)?;
    assert_eq!(h.server.backend().seat().pointer_focus, None);
    assert_eq!(h.server.backend().cursor_image(), Some("left_ptr"));
    assert_eq!(h.server.focused_client(), Some(right));
    Ok(())
}

#[test]
fn test_cursor_image_requests_need_pointer_focus() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (_, surface) = h.map("term", window())?;
    h.server.backend_mut().set_surface_client(surface, SeatClient(7));
    let image = h.server.backend_mut().new_surface();

    h.server.dispatch(Event::RequestSetCursor {
        seat_client: SeatClient(7),
        surface: Some(image),
        hotspot: (1, 2),
    })?;
    assert_eq!(h.server.backend().cursor_surface(), None);

    h.move_pointer(20.0, 20.0)?;
    h.server.dispatch(Event::RequestSetCursor {
        seat_client: SeatClient(8),
        surface: Some(image),
        hotspot: (1, 2),
    })?;
    assert_eq!(h.server.backend().cursor_surface(), None);
    h.server.dispatch(Event::RequestSetCursor {
        seat_client: SeatClient(7),
        surface: Some(image),
        hotspot: (1, 2),
    })?;
    assert_eq!(h.server.backend().cursor_surface(), Some((Some(image), (1, 2))));
    Ok(())
}

#[test]
fn test_cursor_theme_from_config() -> Result<()> {
    let h = Harness::new(1)?;
    assert_eq!(h.server.backend().cursor_theme(), Some((None, 24)));

    let mut config = StrataConfig::default();
    config.pointer.cursor_theme = "Adwaita".into();
    config.pointer.cursor_size = 32;
    let h = Harness::with_config(1, config)?;
    assert_eq!(h.server.backend().cursor_theme(), Some((Some("Adwaita"), 32)));
    Ok(())
}

#[test]
fn test_pointer_events_forwarded_to_seat() -> Result<()> {
    let mut h = Harness::new(1)?;
    h.server.dispatch(Event::PointerFrame)?;
    h.server.dispatch(Event::RequestSetSelection {
        source: None,
        serial: 9,
    })?;
    h.button(BTN_LEFT, ButtonState::Pressed)?;
    let seat = h.server.backend().seat();
    assert_eq!(seat.frames, 1);
    assert_eq!(seat.selection, Some((None, 9)));
    assert_eq!(seat.buttons, vec![(0, BTN_LEFT, ButtonState::Pressed)]);
    Ok(())
}

#[test]
fn test_absolute_motion_maps_to_layout() -> Result<()> {
    let mut h = Harness::new(2)?;
    h.server.dispatch(Event::PointerMotionAbsolute {
        device: h.pointer,
        time_msec: 0,
        x: 0.75,
        y: 0.5,
    })?;
    assert_eq!(h.server.backend().cursor_position(), (1500.0, 400.0));
    Ok(())
}

#[test]
fn test_output_management_test_and_apply() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_a, _) = h.outputs[0];
    let (handle_b, _) = h.outputs[1];

    let moved = OutputConfiguration {
        serial: 1,
        heads: vec![HeadConfig {
            output: handle_b,
            enabled: true,
            mode: None,
            position: Some((0, 800)),
            scale: Some(2.0),
        }],
    };
    h.server.dispatch(Event::OutputManagerTest {
        config: moved.clone(),
    })?;
    assert_eq!(h.server.backend().config_results(), &[(1, true)]);
    // testing changes nothing
    assert_eq!(h.server.backend().layout_box(handle_b), Rectangle::new(1000, 0, 1000, 800));

    h.server.dispatch(Event::OutputManagerApply { config: moved })?;
    assert_eq!(h.server.backend().config_results(), &[(1, true), (1, true)]);
    assert_eq!(h.server.backend().layout_box(handle_b), Rectangle::new(0, 800, 1000, 800));
    assert_eq!(h.server.backend().output(handle_b).unwrap().info.scale, 2.0);
    let heads = h.server.backend().published_heads().last().unwrap();
    assert_eq!(heads.len(), 2);
    assert_eq!((heads[1].x, heads[1].y), (0, 800));

    let bad_scale = OutputConfiguration {
        serial: 2,
        heads: vec![HeadConfig {
            output: handle_a,
            enabled: true,
            mode: None,
            position: None,
            scale: Some(0.0),
        }],
    };
    h.server.dispatch(Event::OutputManagerTest {
        config: bad_scale.clone(),
    })?;
    let err = h
        .server
        .dispatch(Event::OutputManagerApply { config: bad_scale })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::OutputConfig(OutputConfigError::InvalidScale { .. })
    ));
    assert_eq!(&h.server.backend().config_results()[2..], &[(2, false), (2, false)]);

    let unknown = OutputConfiguration {
        serial: 3,
        heads: vec![HeadConfig {
            output: OutputHandle(999),
            enabled: false,
            mode: None,
            position: None,
            scale: None,
        }],
    };
    h.server.dispatch(Event::OutputManagerTest { config: unknown })?;
    assert_eq!(h.server.backend().config_results().last(), Some(&(3, false)));
    Ok(())
}

#[test]
fn test_failed_apply_rolls_back_committed_heads() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_a, _) = h.outputs[0];
    let (handle_b, _) = h.outputs[1];
    h.server.backend_mut().fail_commits(handle_b);

    let config = OutputConfiguration {
        serial: 7,
        heads: vec![
            HeadConfig {
                output: handle_a,
                enabled: true,
                mode: None,
                position: Some((2000, 0)),
                scale: None,
            },
            HeadConfig {
                output: handle_b,
                enabled: true,
                mode: None,
                position: Some((0, 0)),
                scale: None,
            },
        ],
    };
    let err = h
        .server
        .dispatch(Event::OutputManagerApply { config })
        .unwrap_err();
    assert!(matches!(err, CoreError::OutputConfig(OutputConfigError::Backend(_))));
    assert_eq!(h.server.backend().config_results(), &[(7, false)]);
    assert_eq!(h.server.backend().output(handle_a).unwrap().info.position, (0, 0));
    assert_eq!(h.server.backend().layout_box(handle_a), Rectangle::new(0, 0, 1000, 800));
    Ok(())
}

fn single_head(serial: u32, output: OutputHandle, enabled: bool) -> OutputConfiguration {
    OutputConfiguration {
        serial,
        heads: vec![HeadConfig {
            output,
            enabled,
            mode: None,
            position: None,
            scale: None,
        }],
    }
}

#[test]
fn test_reenabled_head_returns_to_layout() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_b, b) = h.outputs[1];

    h.server.dispatch(Event::OutputManagerApply {
        config: single_head(1, handle_b, false),
    })?;
    assert!(h.server.backend().layout_box(handle_b).is_empty());
    assert!(!h.server.registry().outputs.get(b).unwrap().is_usable());

    h.server.dispatch(Event::OutputManagerApply {
        config: single_head(2, handle_b, true),
    })?;
    assert_eq!(h.server.backend().config_results(), &[(1, true), (2, true)]);
    assert_eq!(h.server.backend().layout_box(handle_b), Rectangle::new(1000, 0, 1000, 800));
    assert!(h.server.registry().outputs.get(b).unwrap().is_usable());
    assert_eq!(h.server.backend().published_heads().last().unwrap().len(), 2);
    Ok(())
}

#[test]
fn test_apply_fails_when_head_cannot_be_placed() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_b, _) = h.outputs[1];
    h.server.dispatch(Event::OutputManagerApply {
        config: single_head(1, handle_b, false),
    })?;
    h.server.backend_mut().make_unplaceable(handle_b);

    let err = h
        .server
        .dispatch(Event::OutputManagerApply {
            config: single_head(2, handle_b, true),
        })
        .unwrap_err();
    match err {
        CoreError::OutputConfig(OutputConfigError::Unplaced(name)) => assert_eq!(name, "OUT-2"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(h.server.backend().config_results().last(), Some(&(2, false)));
    // rolled back to disabled
    assert!(!h.server.backend().output(handle_b).unwrap().info.enabled);
    Ok(())
}

#[test]
fn test_empty_layout_box_is_reported() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_b, b) = h.outputs[1];
    h.server.backend_mut().make_unplaceable(handle_b);

    let err = h.server.dispatch(Event::LayoutChange).unwrap_err();
    match err {
        CoreError::Layout(LayoutError::EmptyBox { outputs, names }) => {
            assert_eq!(outputs, vec![b]);
            assert_eq!(names, vec!["OUT-2".to_string()]);
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(!h.server.registry().outputs.get(b).unwrap().is_usable());
    assert!(h.server.registry().outputs.get(h.output(0)).unwrap().is_usable());
    // the usable outputs are still published
    let heads = h.server.backend().published_heads().last().unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].name, "OUT-1");
    Ok(())
}

#[test]
fn test_unusable_output_is_skipped() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_a, a) = h.outputs[0];
    let b = h.output(1);
    let (early, early_surface) = h.map("early", window())?;
    assert_eq!(h.server.registry().clients.get(early).unwrap().output, Some(a));

    h.server.backend_mut().make_unplaceable(handle_a);
    assert!(h.server.dispatch(Event::LayoutChange).is_err());
    assert_eq!(h.server.current_output(), Some(b));
    // clients move to the output that can still show them
    let client = h.server.registry().clients.get(early).unwrap();
    assert_eq!(client.output, Some(b));
    assert!(h.shown(early_surface));

    let (late, _) = h.map("late", window())?;
    assert_eq!(h.server.registry().clients.get(late).unwrap().output, Some(b));

    h.server.execute(CompositorAction::FocusOutputNext)?;
    assert_eq!(h.server.current_output(), Some(b));
    Ok(())
}

#[test]
fn test_output_removal_moves_clients() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_b, b) = h.outputs[1];
    let a = h.output(0);
    h.server.view(a, TagMask::mask_of(2));

    h.move_pointer(1500.0, 100.0)?;
    assert_eq!(h.server.registry().output_at(h.server.backend(), 1500.0, 100.0), Some(b));
    h.server.execute(CompositorAction::FocusOutputNext)?;
    assert_eq!(h.server.current_output(), Some(b));
    let (id, surface) = h.map("wanderer", Rectangle::new(1100, 50, 200, 100))?;
    assert_eq!(h.server.registry().clients.get(id).unwrap().output, Some(b));

    h.server.backend_mut().remove_output(handle_b);
    h.server.dispatch(Event::OutputDestroy { output: handle_b })?;

    assert!(h.server.registry().outputs.get(b).is_none());
    assert_eq!(h.server.current_output(), Some(a));
    let client = h.server.registry().clients.get(id).unwrap();
    assert_eq!(client.output, Some(a));
    assert_eq!(client.tags, TagMask::mask_of(2));
    assert!(h.shown(surface));
    Ok(())
}

#[test]
fn test_non_desktop_outputs_are_ignored() -> Result<()> {
    let mut backend = HeadlessBackend::new();
    let headset = backend.add_non_desktop_output("HMD", Mode::new(2000, 2000, 90_000));
    let mut server = Server::new(StrataConfig::default(), backend)?;
    server.dispatch(Event::NewOutput { output: headset })?;
    assert!(server.registry().outputs.is_empty());
    assert!(server.backend().output(headset).unwrap().commits.is_empty());
    Ok(())
}

#[test]
fn test_frames_render_and_report_done() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (handle, _) = h.outputs[0];
    h.server.dispatch(Event::OutputFrame { output: handle })?;
    h.server.dispatch(Event::OutputFrame { output: handle })?;
    let output = h.server.backend().output(handle).unwrap();
    assert_eq!(output.renders, 2);
    assert!(output.last_frame_done.is_some());
    Ok(())
}

#[test]
fn test_layer_surfaces_are_filed_per_output() -> Result<()> {
    let mut h = Harness::new(2)?;
    let (handle_b, b) = h.outputs[1];
    let bar = h.server.backend_mut().new_surface();
    h.server.dispatch(Event::NewLayerSurface {
        surface: bar,
        output: Some(handle_b),
        layer: LayerShellLayer::Top,
        namespace: "panel".into(),
    })?;
    h.server.dispatch(Event::SurfaceMap {
        surface: bar,
        geometry: Rectangle::new(1000, 0, 1000, 30),
        title: String::new(),
        app_id: String::new(),
    })?;
    let output = h.server.registry().outputs.get(b).unwrap();
    assert_eq!(output.layer_surfaces(LayerShellLayer::Top), &[bar]);
    assert!(h.server.registry().clients.is_empty());

    h.server.dispatch(Event::SurfaceUnmap { surface: bar })?;
    let output = h.server.registry().outputs.get(b).unwrap();
    assert!(output.layer_surfaces(LayerShellLayer::Top).is_empty());
    Ok(())
}

#[test]
fn test_decorations_use_configured_mode() -> Result<()> {
    let mut h = Harness::new(1)?;
    let surface = h.server.backend_mut().new_surface();
    let decoration = strata::backend::DecorationHandle(42);
    h.server.dispatch(Event::NewDecoration {
        decoration,
        surface,
    })?;
    assert_eq!(
        h.server.backend().decoration_mode(decoration),
        Some(DecorationMode::ServerSide)
    );
    Ok(())
}

#[test]
fn test_status_subscribers_receive_updates() -> Result<()> {
    let mut h = Harness::new(1)?;
    let a = h.output(0);
    let sink = CollectingSink::new();
    h.server.status_mut().bind(a, Box::new(sink.clone()));

    h.map("foot", window())?;
    let status = sink.last().unwrap();
    assert_eq!(status.app_id, "foot");
    assert_eq!(status.tags.len(), 9);

    h.server.set_current_tag(a, 4);
    let status = sink.last().unwrap();
    assert!(status.tags[4].active);
    assert_eq!(status.app_id, "");
    Ok(())
}

#[test]
fn test_kill_client_asks_toplevel_to_close() -> Result<()> {
    let mut h = Harness::new(1)?;
    let (_, surface) = h.map("victim", window())?;
    h.server.execute(CompositorAction::KillClient)?;
    assert!(h.server.backend().toplevel(surface).unwrap().close_requested);
    Ok(())
}

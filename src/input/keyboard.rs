//! Keyboard state, keysym resolution and key bindings

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use xkbcommon::xkb;

use crate::backend::BackendResult;
use crate::config::KeyboardConfig;
use crate::error::BackendError;
use crate::input::CompositorAction;

/// Offset between evdev keycodes and xkb keycodes
pub const XKB_KEYCODE_OFFSET: u32 = 8;

bitflags! {
    /// Modifier mask as reported by the keyboard
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const CAPS = 1 << 1;
        const CTRL = 1 << 2;
        const ALT = 1 << 3;
        const MOD2 = 1 << 4;
        const MOD3 = 1 << 5;
        const LOGO = 1 << 6;
        const MOD5 = 1 << 7;
    }
}

impl Modifiers {
    /// Parse a single modifier name ("Super", "Shift", "Ctrl", ...)
    pub fn from_key_name(name: &str) -> Option<Self> {
        let modifier = match name.to_ascii_lowercase().as_str() {
            "shift" => Modifiers::SHIFT,
            "caps" | "lock" | "capslock" => Modifiers::CAPS,
            "ctrl" | "control" => Modifiers::CTRL,
            "alt" | "mod1" => Modifiers::ALT,
            "mod2" => Modifiers::MOD2,
            "mod3" => Modifiers::MOD3,
            "super" | "logo" | "mod4" | "win" => Modifiers::LOGO,
            "mod5" => Modifiers::MOD5,
            _ => return None,
        };
        Some(modifier)
    }
}

/// Raw keyboard modifier state (xkb components)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyboardModifiers {
    #[serde(default)]
    pub depressed: u32,
    #[serde(default)]
    pub latched: u32,
    #[serde(default)]
    pub locked: u32,
    #[serde(default)]
    pub group: u32,
}

impl KeyboardModifiers {
    /// Effective modifier mask (depressed | latched | locked)
    pub fn effective(&self) -> Modifiers {
        Modifiers::from_bits_truncate(self.depressed | self.latched | self.locked)
    }

    pub fn with_depressed(mods: Modifiers) -> Self {
        Self {
            depressed: mods.bits(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Pressed,
    Released,
}

/// A keyboard symbol (xkb keysym value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keysym(pub u32);

impl Keysym {
    pub const NO_SYMBOL: Keysym = Keysym(0);

    /// Look up a keysym by its xkb name; exact match first, then case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        let name = match name {
            "Enter" | "enter" => "Return",
            "Esc" | "esc" => "Escape",
            other => other,
        };
        [xkb::KEYSYM_NO_FLAGS, xkb::KEYSYM_CASE_INSENSITIVE]
            .into_iter()
            .map(|flags| Keysym(xkb::keysym_from_name(name, flags).raw()))
            .find(|sym| *sym != Keysym::NO_SYMBOL)
    }

    pub fn name(&self) -> String {
        xkb::keysym_get_name(xkb::Keysym::from(self.0))
    }
}

impl fmt::Display for Keysym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Resolves keycodes to symbols under the live modifier state
pub trait KeyboardLayout {
    /// Symbols produced by an xkb keycode (evdev + 8)
    fn key_syms(&self, xkb_keycode: u32) -> Vec<Keysym>;

    fn update_modifiers(&mut self, modifiers: &KeyboardModifiers);
}

/// Layout backed by a compiled xkb keymap
pub struct XkbLayout {
    state: xkb::State,
}

impl XkbLayout {
    /// Compile a keymap from RMLVO names
    pub fn from_config(config: &KeyboardConfig) -> BackendResult<Self> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let options = (!config.options.is_empty()).then(|| config.options.clone());
        let keymap = xkb::Keymap::new_from_names(
            &context,
            &config.rules,
            &config.model,
            &config.layout,
            &config.variant,
            options,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or_else(|| {
            BackendError::Keymap(format!(
                "rules={:?} model={:?} layout={:?} variant={:?}",
                config.rules, config.model, config.layout, config.variant
            ))
        })?;
        Ok(Self {
            state: xkb::State::new(&keymap),
        })
    }
}

impl KeyboardLayout for XkbLayout {
    fn key_syms(&self, xkb_keycode: u32) -> Vec<Keysym> {
        self.state
            .key_get_syms(xkb::Keycode::from(xkb_keycode))
            .iter()
            .map(|sym| Keysym(sym.raw()))
            .collect()
    }

    fn update_modifiers(&mut self, modifiers: &KeyboardModifiers) {
        self.state.update_mask(
            modifiers.depressed,
            modifiers.latched,
            modifiers.locked,
            0,
            0,
            modifiers.group,
        );
    }
}

/// Fixed keycode → keysym table, ignoring modifiers
#[derive(Debug, Clone, Default)]
pub struct KeysymTable {
    syms: HashMap<u32, Vec<Keysym>>,
}

impl KeysymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map an evdev keycode to a symbol
    pub fn with_key(mut self, evdev_keycode: u32, sym: Keysym) -> Self {
        self.syms
            .entry(evdev_keycode + XKB_KEYCODE_OFFSET)
            .or_default()
            .push(sym);
        self
    }
}

impl KeyboardLayout for KeysymTable {
    fn key_syms(&self, xkb_keycode: u32) -> Vec<Keysym> {
        self.syms.get(&xkb_keycode).cloned().unwrap_or_default()
    }

    fn update_modifiers(&mut self, _modifiers: &KeyboardModifiers) {}
}

/// A compiled key binding
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBinding {
    pub mods: Modifiers,
    pub keysym: Keysym,
    pub action: CompositorAction,
}

/// Parse "Super+Shift+Return" into a modifier mask and keysym
pub fn parse_key_combo(combo: &str) -> Option<(Modifiers, Keysym)> {
    let mut parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let key = parts.pop().filter(|k| !k.is_empty())?;
    let mut mods = Modifiers::empty();
    for part in parts {
        mods |= Modifiers::from_key_name(part)?;
    }
    Some((mods, Keysym::from_name(key)?))
}

/// First binding whose mask equals `mods` exactly and whose keysym is `sym`
pub fn find_binding(bindings: &[KeyBinding], mods: Modifiers, sym: Keysym) -> Option<&KeyBinding> {
    bindings
        .iter()
        .find(|binding| (mods ^ binding.mods).is_empty() && binding.keysym == sym)
}

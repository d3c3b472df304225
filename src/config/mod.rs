//! Configuration management for Strata
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files: key bindings, focus policy, pointer grabs, keyboard
//! layout and decoration policy.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::input::cursor::MouseButton;
use crate::input::keyboard::{parse_key_combo, KeyBinding, Modifiers};
use crate::input::CompositorAction;
use crate::tags::MAX_TAGS;

/// Main configuration struct containing all Strata settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrataConfig {
    /// General compositor settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Keyboard layout and repeat
    #[serde(default)]
    pub keyboard: KeyboardConfig,

    /// Interactive move/resize and cursor theme
    #[serde(default)]
    pub pointer: PointerConfig,

    /// Toplevel decoration policy
    #[serde(default)]
    pub decoration: DecorationConfig,

    /// Tag settings
    #[serde(default)]
    pub tags: TagsConfig,

    /// Key bindings, matched in order; `None` uses the built-in set for
    /// the configured tag count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<Vec<BindingConfig>>,
}

/// General compositor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Focus follows the pointer
    pub sloppy_focus: bool,

    /// Enable debug logging
    pub debug: bool,
}

/// Keyboard configuration (xkb RMLVO names and repeat)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeyboardConfig {
    pub rules: String,
    pub model: String,
    pub layout: String,
    pub variant: String,
    pub options: String,

    /// Keyboard repeat rate (per second)
    pub repeat_rate: i32,

    /// Keyboard repeat delay (milliseconds)
    pub repeat_delay: i32,
}

/// Pointer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PointerConfig {
    /// Modifier(s) that turn a button press into a move/resize, e.g. "Alt" or "Super+Shift"
    pub grab_modifier: String,

    pub move_button: MouseButton,

    pub resize_button: MouseButton,

    /// xcursor theme; empty for the default theme
    pub cursor_theme: String,

    pub cursor_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecorationMode {
    ClientSide,
    ServerSide,
}

/// Decoration configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecorationConfig {
    /// Mode every toplevel decoration is set to
    pub mode: DecorationMode,
}

/// Tag configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TagsConfig {
    /// Number of tags shown to status bars and usable in bindings
    pub count: u32,
}

/// One key binding as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindingConfig {
    /// e.g. "Super+Shift+q"
    pub keys: String,

    /// e.g. "quit", "view 2", "spawn foot"
    pub action: String,
}

impl BindingConfig {
    pub fn new(keys: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            keys: keys.into(),
            action: action.into(),
        }
    }
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            keyboard: KeyboardConfig::default(),
            pointer: PointerConfig::default(),
            decoration: DecorationConfig::default(),
            tags: TagsConfig::default(),
            bindings: None,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            sloppy_focus: true,
            debug: false,
        }
    }
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            rules: String::new(),
            model: String::new(),
            layout: String::new(),
            variant: String::new(),
            options: String::new(),
            repeat_rate: 25,
            repeat_delay: 600,
        }
    }
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            grab_modifier: "Alt".to_string(),
            move_button: MouseButton::Left,
            resize_button: MouseButton::Right,
            cursor_theme: String::new(),
            cursor_size: 24,
        }
    }
}

impl Default for DecorationConfig {
    fn default() -> Self {
        Self {
            mode: DecorationMode::ServerSide,
        }
    }
}

impl Default for TagsConfig {
    fn default() -> Self {
        Self { count: 9 }
    }
}

/// Built-in bindings; per-tag bindings exist for the first `tag_count`
/// tags that have a digit key
pub fn default_bindings(tag_count: u32) -> Vec<BindingConfig> {
    let mut bindings = vec![
        BindingConfig::new("Super+Return", "spawn foot"),
        BindingConfig::new("Super+Shift+q", "quit"),
        BindingConfig::new("Super+Shift+c", "kill_client"),
        BindingConfig::new("Super+j", "focus_next"),
        BindingConfig::new("Super+k", "focus_prev"),
        BindingConfig::new("Super+period", "focus_output_next"),
        BindingConfig::new("Super+0", "view_all"),
        BindingConfig::new("Super+i", "print_info"),
    ];
    for tag in 1..=tag_count.min(9) {
        bindings.push(BindingConfig::new(format!("Super+{}", tag), format!("view {}", tag)));
        bindings.push(BindingConfig::new(
            format!("Super+Ctrl+{}", tag),
            format!("toggle_view {}", tag),
        ));
        bindings.push(BindingConfig::new(format!("Super+Alt+{}", tag), format!("tag {}", tag)));
        bindings.push(BindingConfig::new(
            format!("Super+Ctrl+Alt+{}", tag),
            format!("toggle_tag {}", tag),
        ));
    }
    bindings
}

/// Parse "Super+Shift" into a modifier mask
pub fn parse_modifiers(names: &str) -> Option<Modifiers> {
    names
        .split('+')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .try_fold(Modifiers::empty(), |mods, name| {
            Some(mods | Modifiers::from_key_name(name)?)
        })
}

impl StrataConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let rest = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(rest)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: StrataConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.tags.count == 0 || self.tags.count >= MAX_TAGS {
            anyhow::bail!(
                "Invalid tags.count {}: must be between 1 and {}",
                self.tags.count,
                MAX_TAGS - 1
            );
        }

        if self.keyboard.repeat_rate <= 0 {
            anyhow::bail!("Invalid repeat_rate: must be positive");
        }
        if self.keyboard.repeat_delay < 0 {
            anyhow::bail!("Invalid repeat_delay: must not be negative");
        }

        self.grab_modifier()?;
        if self.pointer.cursor_size == 0 {
            anyhow::bail!("Invalid cursor_size: must be positive");
        }
        if self.pointer.move_button == self.pointer.resize_button {
            anyhow::bail!("move_button and resize_button must differ");
        }

        self.compile_bindings()?;

        Ok(())
    }

    /// Modifier mask that starts interactive grabs
    pub fn grab_modifier(&self) -> Result<Modifiers> {
        parse_modifiers(&self.pointer.grab_modifier)
            .with_context(|| format!("Invalid grab_modifier: {}", self.pointer.grab_modifier))
    }

    /// Configured bindings, or the built-in ones when none are configured
    pub fn bindings(&self) -> Vec<BindingConfig> {
        self.bindings
            .clone()
            .unwrap_or_else(|| default_bindings(self.tags.count))
    }

    /// Turn the configured bindings into the table matched on key presses
    pub fn compile_bindings(&self) -> Result<Vec<KeyBinding>> {
        self.bindings()
            .iter()
            .map(|binding| {
                let (mods, keysym) = parse_key_combo(&binding.keys)
                    .with_context(|| format!("Invalid key combination: {}", binding.keys))?;
                let action: CompositorAction = binding
                    .action
                    .parse()
                    .with_context(|| format!("Invalid action for {}", binding.keys))?;
                if let Some(tag) = action.tag() {
                    if tag >= self.tags.count {
                        anyhow::bail!(
                            "Binding {} refers to tag {} but only {} tags are configured",
                            binding.keys,
                            tag + 1,
                            self.tags.count
                        );
                    }
                }
                Ok(KeyBinding {
                    mods,
                    keysym,
                    action,
                })
            })
            .collect()
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Non-default values from the partial config will override this config
    pub fn merge_partial(mut self, partial: StrataConfig) -> Self {
        let default_config = StrataConfig::default();

        if partial.general != default_config.general {
            self.general = partial.general;
        }
        if partial.keyboard != default_config.keyboard {
            self.keyboard = partial.keyboard;
        }
        if partial.pointer != default_config.pointer {
            self.pointer = partial.pointer;
        }
        if partial.decoration != default_config.decoration {
            self.decoration = partial.decoration;
        }
        if partial.tags != default_config.tags {
            self.tags = partial.tags;
        }
        if partial.bindings.is_some() {
            self.bindings = partial.bindings;
        }

        self
    }
}


#[cfg(test)]
mod property_tests;

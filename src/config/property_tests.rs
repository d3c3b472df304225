//! Property-based tests for configuration module
//!
//! These tests use proptest to generate random configurations and verify
//! validation and serialization invariants.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn valid_keyboard_config()(
        layout in prop_oneof![Just(String::new()), Just("us".to_string()), Just("de".to_string())],
        repeat_rate in 1i32..100,
        repeat_delay in 0i32..2000,
    ) -> KeyboardConfig {
        KeyboardConfig {
            layout,
            repeat_rate,
            repeat_delay,
            ..KeyboardConfig::default()
        }
    }
}

prop_compose! {
    fn valid_pointer_config()(
        grab_modifier in prop_oneof![
            Just("Alt".to_string()),
            Just("Super".to_string()),
            Just("Super+Shift".to_string()),
            Just("Ctrl+Alt".to_string()),
        ],
        swap in any::<bool>(),
        cursor_size in 8u32..128,
    ) -> PointerConfig {
        let (move_button, resize_button) = if swap {
            (MouseButton::Right, MouseButton::Left)
        } else {
            (MouseButton::Left, MouseButton::Right)
        };
        PointerConfig {
            grab_modifier,
            move_button,
            resize_button,
            cursor_theme: String::new(),
            cursor_size,
        }
    }
}

prop_compose! {
    fn valid_config()(
        sloppy_focus in any::<bool>(),
        keyboard in valid_keyboard_config(),
        pointer in valid_pointer_config(),
        server_side in any::<bool>(),
        count in 1u32..MAX_TAGS,
        view_tag in 1u32..=9,
    ) -> StrataConfig {
        let count = count.max(view_tag);
        StrataConfig {
            general: GeneralConfig { sloppy_focus, debug: false },
            keyboard,
            pointer,
            decoration: DecorationConfig {
                mode: if server_side { DecorationMode::ServerSide } else { DecorationMode::ClientSide },
            },
            tags: TagsConfig { count },
            bindings: Some(vec![
                BindingConfig::new("Super+Shift+q", "quit"),
                BindingConfig::new(format!("Super+{}", view_tag), format!("view {}", view_tag)),
            ]),
        }
    }
}

proptest! {
    #[test]
    fn generated_configs_validate(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip_preserves_config(config in valid_config()) {
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: StrataConfig = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }

    #[test]
    fn out_of_range_tag_bindings_are_rejected(count in 1u32..9, extra in 1u32..10) {
        let tag = count + extra;
        let config = StrataConfig {
            tags: TagsConfig { count },
            bindings: Some(vec![BindingConfig::new("Super+q", format!("tag {}", tag))]),
            ..StrataConfig::default()
        };
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_repeat_rate_is_rejected(rate in -100i32..=0) {
        let mut config = StrataConfig::default();
        config.keyboard.repeat_rate = rate;
        prop_assert!(config.validate().is_err());
    }
}

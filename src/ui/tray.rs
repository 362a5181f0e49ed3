//! System Tray
//!
//! Status item icon and menu. The menu is rebuilt from scratch whenever the
//! set of visible services, the selection or the usage summary changes.

use anyhow::Result;
use chrono::Utc;
use tray_icon::menu::{
    CheckMenuItem, Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem, Submenu,
};

use crate::data::{PreferenceStore, ServiceId, ServiceRegistry, UsageSnapshot};

/// What a menu click asks the shell to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayAction {
    ShowPopup,
    SelectService(ServiceId),
    ToggleVisibility(String),
    ToggleAlwaysOnTop,
    TogglePinPosition,
    StopMicrophone,
    RequestMicrophone,
    ReloadService,
    ClearCache,
    ForgetUsage,
    ReloadSettings,
    OpenSettings,
    Quit,
}

pub struct TrayMenu {
    menu: Menu,
    actions: Vec<(MenuId, TrayAction)>,
}

impl TrayMenu {
    pub fn build(
        registry: &ServiceRegistry,
        prefs: &PreferenceStore,
        selected: Option<&ServiceId>,
        usage: &UsageSnapshot,
    ) -> Result<Self> {
        let menu = Menu::new();
        let mut actions = Vec::new();

        let show = MenuItem::new(format!("Show Popup ({})", prefs.hotkey_display()), true, None);
        actions.push((show.id().clone(), TrayAction::ShowPopup));
        menu.append(&show)?;
        menu.append(&PredefinedMenuItem::separator())?;

        for service in registry.visible(prefs) {
            let item = CheckMenuItem::new(
                &service.name,
                true,
                selected == Some(&service.id),
                None,
            );
            actions.push((item.id().clone(), TrayAction::SelectService(service.id.clone())));
            menu.append(&item)?;
        }

        let visibility = Submenu::new("Show Services", true);
        for service in registry.all() {
            let item = CheckMenuItem::new(
                &service.name,
                true,
                prefs.is_service_visible(&service.name),
                None,
            );
            actions.push((item.id().clone(), TrayAction::ToggleVisibility(service.name.clone())));
            visibility.append(&item)?;
        }
        menu.append(&PredefinedMenuItem::separator())?;
        menu.append(&visibility)?;

        let on_top = CheckMenuItem::new("Always on Top", true, prefs.always_on_top(), None);
        actions.push((on_top.id().clone(), TrayAction::ToggleAlwaysOnTop));
        menu.append(&on_top)?;

        let pin = CheckMenuItem::new("Pin Position", true, prefs.pinned_position_enabled(), None);
        actions.push((pin.id().clone(), TrayAction::TogglePinPosition));
        menu.append(&pin)?;
        menu.append(&PredefinedMenuItem::separator())?;

        let plain = [
            ("Stop Microphone", TrayAction::StopMicrophone),
            ("Request Microphone Access", TrayAction::RequestMicrophone),
            ("Reload Service", TrayAction::ReloadService),
            ("Clear Cache", TrayAction::ClearCache),
        ];
        for (label, action) in plain {
            let item = MenuItem::new(label, true, None);
            actions.push((item.id().clone(), action));
            menu.append(&item)?;
        }
        menu.append(&PredefinedMenuItem::separator())?;

        let usage_menu = Submenu::new("Usage", true);
        for line in usage.summary(Utc::now()).lines() {
            usage_menu.append(&MenuItem::new(line, false, None))?;
        }
        let recent = usage.recently_used(5);
        if !recent.is_empty() {
            usage_menu.append(&PredefinedMenuItem::separator())?;
            for record in recent {
                let label = format!("{} ({})", record.service_name, record.access_count);
                usage_menu.append(&MenuItem::new(label, false, None))?;
            }
        }
        usage_menu.append(&PredefinedMenuItem::separator())?;
        let forget_label = match selected.and_then(|id| registry.get(id)) {
            Some(service) => format!("Forget {} Usage", service.name),
            None => "Forget Usage".to_string(),
        };
        let forget = MenuItem::new(forget_label, selected.is_some(), None);
        actions.push((forget.id().clone(), TrayAction::ForgetUsage));
        usage_menu.append(&forget)?;
        menu.append(&usage_menu)?;

        let settings = [
            ("Open Settings File", TrayAction::OpenSettings),
            ("Reload Settings", TrayAction::ReloadSettings),
        ];
        for (label, action) in settings {
            let item = MenuItem::new(label, true, None);
            actions.push((item.id().clone(), action));
            menu.append(&item)?;
        }
        menu.append(&PredefinedMenuItem::separator())?;

        let quit = MenuItem::new("Quit", true, None);
        actions.push((quit.id().clone(), TrayAction::Quit));
        menu.append(&quit)?;

        Ok(Self { menu, actions })
    }

    pub fn menu(&self) -> &Menu {
        &self.menu
    }

    pub fn action(&self, event: &MenuEvent) -> Option<TrayAction> {
        self.actions
            .iter()
            .find(|(id, _)| event.id == *id)
            .map(|(_, action)| action.clone())
    }
}

const ICON_SIZE: u32 = 32;

fn put(rgba: &mut [u8], x: i32, y: i32, color: (u8, u8, u8, u8)) {
    if x < 0 || y < 0 || x >= ICON_SIZE as i32 || y >= ICON_SIZE as i32 {
        return;
    }
    let idx = (y as u32 * ICON_SIZE + x as u32) as usize * 4;
    rgba[idx] = color.0;
    rgba[idx + 1] = color.1;
    rgba[idx + 2] = color.2;
    rgba[idx + 3] = color.3;
}

/// Gradient disc with a white speech bubble
fn icon_rgba() -> Vec<u8> {
    let width = ICON_SIZE;
    let height = ICON_SIZE;
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);

    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;
    let radius = (width.min(height) as f32 / 2.0) - 1.0;

    let color_start = (16u8, 163u8, 127u8);
    let color_end = (59u8, 130u8, 246u8);

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - center_x;
            let dy = y as f32 - center_y;
            let dist = (dx * dx + dy * dy).sqrt();

            if dist <= radius {
                let t = ((x as f32 / width as f32) + (y as f32 / height as f32)) / 2.0;
                let mix = |a: u8, b: u8| (a as f32 * (1.0 - t) + b as f32 * t) as u8;

                // soft edge
                let alpha = if dist > radius - 1.5 {
                    ((radius - dist + 1.5) / 1.5 * 255.0) as u8
                } else {
                    255
                };

                rgba.extend_from_slice(&[
                    mix(color_start.0, color_end.0),
                    mix(color_start.1, color_end.1),
                    mix(color_start.2, color_end.2),
                    alpha,
                ]);
            } else {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    let white = (255u8, 255u8, 255u8, 255u8);
    let cx = center_x as i32;
    let cy = center_y as i32;

    // bubble body
    for dy in -6..=3 {
        for dx in -8..=8 {
            let in_corner = (dy == -6 || dy == 3) && (dx == -8 || dx == 8);
            if !in_corner {
                put(&mut rgba, cx + dx, cy + dy, white);
            }
        }
    }
    // tail
    for step in 0..4 {
        for dx in -4 + step..=-2 {
            put(&mut rgba, cx + dx, cy + 4 + step, white);
        }
    }
    // three dots cut back out of the bubble
    for dot in [-5, 0, 5] {
        for dy in -2..=0 {
            for dx in -1..=1 {
                let idx = ((cy + dy) as u32 * width + (cx + dot + dx) as u32) as usize * 4;
                rgba[idx + 3] = 0;
            }
        }
    }

    rgba
}

pub fn load_icon() -> Result<tray_icon::Icon> {
    Ok(tray_icon::Icon::from_rgba(icon_rgba(), ICON_SIZE, ICON_SIZE)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha(rgba: &[u8], x: u32, y: u32) -> u8 {
        rgba[((y * ICON_SIZE + x) * 4 + 3) as usize]
    }

    #[test]
    fn icon_has_transparent_corners_and_solid_bubble() {
        let rgba = icon_rgba();
        assert_eq!(rgba.len(), (ICON_SIZE * ICON_SIZE * 4) as usize);
        assert_eq!(alpha(&rgba, 0, 0), 0);
        assert_eq!(alpha(&rgba, ICON_SIZE - 1, ICON_SIZE - 1), 0);

        let bubble = ((16 - 4) * ICON_SIZE + 16) as usize * 4;
        assert_eq!(&rgba[bubble..bubble + 4], &[255, 255, 255, 255]);
        // centre dot is punched through
        assert_eq!(alpha(&rgba, 16, 15), 0);
    }
}

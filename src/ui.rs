//! Egui controls for the IBL settings.

use egui::Ui;

use crate::ibl::IblResourceSet;
use crate::settings::IblSettings;

/// Panel with the IBL toggles, intensity and HDR source selector.
#[derive(Debug, Clone, Default)]
pub struct IblPanel {
    labels: Vec<String>,
}

impl IblPanel {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Panel listing the sources baked into `set`.
    pub fn from_set(set: &IblResourceSet) -> Self {
        Self::new(set.labels().map(str::to_string).collect())
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Draw the controls inside `ui`. Returns whether any setting changed.
    pub fn show(&self, ui: &mut Ui, settings: &mut IblSettings) -> bool {
        let mut changed = false;

        changed |= ui.checkbox(&mut settings.ibl_visible, "apply IBL").changed();
        changed |= ui
            .checkbox(&mut settings.skybox_visible, "show environment")
            .changed();

        let mut intensity = settings.intensity();
        if ui
            .add(
                egui::DragValue::new(&mut intensity)
                    .speed(0.001)
                    .range(0.0..=1.0)
                    .prefix("IBL intensity: "),
            )
            .changed()
        {
            settings.set_intensity(intensity);
            changed = true;
        }

        let mut index = settings.hdr_image_index();
        let selected = self
            .labels
            .get(index)
            .map(String::as_str)
            .unwrap_or("none");
        egui::ComboBox::from_label("select HDR Images")
            .selected_text(selected)
            .show_ui(ui, |ui| {
                for (i, label) in self.labels.iter().enumerate() {
                    ui.selectable_value(&mut index, i, label.as_str());
                }
            });
        if index != settings.hdr_image_index() {
            match settings.select_hdr_image(index, self.labels.len()) {
                Ok(()) => changed = true,
                Err(e) => log::warn!("Ignoring HDR selection: {}", e),
            }
        }

        changed
    }

    /// Show the panel in its own window.
    pub fn window(&self, ctx: &egui::Context, settings: &mut IblSettings) -> bool {
        let mut changed = false;
        egui::Window::new("IBL")
            .default_pos([10.0, 10.0])
            .resizable(false)
            .show(ctx, |ui| {
                ui.heading("Environment");
                ui.separator();
                changed = self.show(ui, settings);
            });
        changed
    }
}

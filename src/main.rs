use eframe::egui;
use egui::{Color32, CornerRadius, RichText, ScrollArea, Stroke, TextureHandle, Ui, ViewportBuilder};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

mod controller;
mod feed_client;
mod models;
mod store;

use crate::controller::AppController;
use crate::feed_client::{image_url_for, FeedClient, FeedLoader, FeedState};
use crate::models::ImageItem;
use crate::store::{CommentStore, Storage};

fn main() -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_inner_size([480.0, 800.0])
            .with_min_inner_size([360.0, 600.0])
            .with_title("Photo Feed"),
        ..Default::default()
    };

    eframe::run_native(
        "Photo Feed",
        options,
        Box::new(|cc| {
            let mut app = PhotoFeedApp::new();

            if let Some(storage) = cc.storage {
                // Restore the saved theme preference
                if let Some(theme_str) = storage.get_string("is_dark_mode") {
                    if let Ok(is_dark_mode) = theme_str.parse::<bool>() {
                        app.is_dark_mode = is_dark_mode;
                        app.theme = if is_dark_mode {
                            AppTheme::dark()
                        } else {
                            AppTheme::light()
                        };
                    }
                }
            }

            Ok(Box::new(app))
        }),
    )
}

// Decode fetched photo bytes into something the GPU can take
fn decode_photo(bytes: &[u8]) -> anyhow::Result<egui::ColorImage> {
    let img = image::load_from_memory(bytes)?;
    let size = [img.width() as usize, img.height() as usize];
    let rgba = img.to_rgba8();
    let pixels = rgba.as_flat_samples();

    Ok(egui::ColorImage::from_rgba_unmultiplied(
        size,
        pixels.as_slice(),
    ))
}

struct AppTheme {
    background: Color32,
    card_background: Color32,
    text: Color32,
    secondary_text: Color32,
    highlight: Color32,
    separator: Color32,
    button_background: Color32,
    button_foreground: Color32,
    button_active_background: Color32,
    button_hover_background: Color32,
}

impl AppTheme {
    fn dark() -> Self {
        Self {
            background: Color32::from_rgb(18, 18, 18),
            card_background: Color32::from_rgb(30, 30, 30),
            text: Color32::from_rgb(240, 240, 240),
            secondary_text: Color32::from_rgb(180, 180, 180),
            highlight: Color32::from_rgb(64, 156, 255),
            separator: Color32::from_rgb(60, 60, 60),
            button_background: Color32::from_rgb(66, 66, 66),
            button_foreground: Color32::from_rgb(240, 240, 240),
            button_active_background: Color32::from_rgb(64, 156, 255),
            button_hover_background: Color32::from_rgb(80, 80, 80),
        }
    }

    fn light() -> Self {
        Self {
            background: Color32::from_rgb(255, 255, 255),
            card_background: Color32::from_rgb(250, 250, 250),
            text: Color32::from_rgb(20, 20, 20),
            secondary_text: Color32::from_rgb(90, 90, 90),
            highlight: Color32::from_rgb(20, 100, 200),
            separator: Color32::from_rgb(210, 210, 210),
            button_background: Color32::from_rgb(235, 235, 235),
            button_foreground: Color32::from_rgb(20, 20, 20),
            button_active_background: Color32::from_rgb(20, 100, 200),
            button_hover_background: Color32::from_rgb(210, 210, 210),
        }
    }

    fn apply_to_ctx(&self, ctx: &egui::Context) {
        let mut style = (*ctx.style()).clone();

        // Base colors
        style.visuals.panel_fill = self.background;
        style.visuals.window_fill = self.card_background;
        style.visuals.window_stroke = Stroke::new(1.0, self.separator);
        style.visuals.widgets.noninteractive.bg_fill = self.card_background;

        // Text
        style.visuals.widgets.noninteractive.fg_stroke = Stroke::new(1.0, self.text);

        // Buttons
        style.visuals.widgets.inactive.bg_fill = self.button_background;
        style.visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, self.button_foreground);
        style.visuals.widgets.active.bg_fill = self.button_active_background;
        style.visuals.widgets.active.fg_stroke = Stroke::new(1.0, self.button_foreground);
        style.visuals.widgets.hovered.bg_fill = self.button_hover_background;
        style.visuals.widgets.hovered.fg_stroke = Stroke::new(1.0, self.button_foreground);

        // Selection
        style.visuals.selection.bg_fill = self.highlight;
        style.visuals.selection.stroke = Stroke::new(1.0, self.highlight);

        // Rounding
        style.visuals.window_corner_radius = CornerRadius::same(8);
        style.visuals.widgets.noninteractive.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.inactive.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.hovered.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.active.corner_radius = CornerRadius::same(4);

        ctx.set_style(style);
    }
}

/// Bookkeeping for lazily fetched card photos. Each photo is fetched at
/// most once per session (failures stay failed), and only a handful of
/// fetches run at a time — a full listing is around a thousand items, and
/// scrolling must not fan that out into a thread per photo.
struct PhotoRequests {
    in_flight: HashSet<i64>,
    loaded: HashSet<i64>,
    failed: HashSet<i64>,
}

impl PhotoRequests {
    const MAX_IN_FLIGHT: usize = 8;

    fn new() -> Self {
        Self {
            in_flight: HashSet::new(),
            loaded: HashSet::new(),
            failed: HashSet::new(),
        }
    }

    /// Claims a fetch slot for `id`. False when the photo is already
    /// loaded, failed, or in flight, or all slots are taken; callers retry
    /// on a later frame.
    fn try_begin(&mut self, id: i64) -> bool {
        if self.loaded.contains(&id) || self.in_flight.contains(&id) || self.failed.contains(&id) {
            return false;
        }
        if self.in_flight.len() >= Self::MAX_IN_FLIGHT {
            return false;
        }
        self.in_flight.insert(id);
        true
    }

    fn finish(&mut self, id: i64, ok: bool) {
        self.in_flight.remove(&id);
        if ok {
            self.loaded.insert(id);
        } else {
            self.failed.insert(id);
        }
    }

    fn has_failed(&self, id: i64) -> bool {
        self.failed.contains(&id)
    }

    fn any_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }
}

struct PhotoFeedApp {
    feed_client: FeedClient,
    feed: FeedLoader,
    controller: AppController,
    comment_input: String,
    theme: AppTheme,
    is_dark_mode: bool,
    started: bool,
    needs_repaint: bool,
    // Card photo textures, keyed by item id
    photo_textures: HashMap<i64, TextureHandle>,
    photo_requests: PhotoRequests,
    photo_sender: mpsc::Sender<(i64, Option<egui::ColorImage>)>,
    photo_receiver: mpsc::Receiver<(i64, Option<egui::ColorImage>)>,
}

impl PhotoFeedApp {
    fn new() -> Self {
        let storage = match Storage::new() {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                eprintln!("Failed to open comment storage: {}", e);
                // Keep the session usable; comments just won't survive it
                Arc::new(Storage::in_memory().expect("Failed to open in-memory storage"))
            }
        };

        let (photo_sender, photo_receiver) = mpsc::channel();

        Self {
            feed_client: FeedClient::new(),
            feed: FeedLoader::new(),
            controller: AppController::new(CommentStore::new(storage)),
            comment_input: String::new(),
            theme: AppTheme::light(),
            is_dark_mode: false,
            started: false,
            needs_repaint: false,
            photo_textures: HashMap::new(),
            photo_requests: PhotoRequests::new(),
            photo_sender,
            photo_receiver,
        }
    }

    fn toggle_theme(&mut self) {
        self.is_dark_mode = !self.is_dark_mode;
        self.theme = if self.is_dark_mode {
            AppTheme::dark()
        } else {
            AppTheme::light()
        };
        self.needs_repaint = true;
    }

    fn open_link(&self, url: &str) {
        if let Err(e) = open::that(url) {
            eprintln!("Failed to open URL: {}", e);
        }
    }

    fn request_photo(&mut self, id: i64) {
        if !self.photo_requests.try_begin(id) {
            return;
        }

        let client = self.feed_client.clone();
        let tx = self.photo_sender.clone();

        thread::spawn(move || {
            let result = match client.fetch_image(id).and_then(|bytes| decode_photo(&bytes)) {
                Ok(img) => Some(img),
                Err(e) => {
                    eprintln!("Failed to load photo {}: {}", id, e);
                    None
                }
            };
            let _ = tx.send((id, result));
        });
    }

    fn poll_photos(&mut self, ctx: &egui::Context) {
        while let Ok((id, result)) = self.photo_receiver.try_recv() {
            self.photo_requests.finish(id, result.is_some());
            if let Some(img) = result {
                let tex = ctx.load_texture(
                    format!("photo-{}", id),
                    img,
                    egui::TextureOptions::default(),
                );
                self.photo_textures.insert(id, tex);
            }
            self.needs_repaint = true;
        }
    }

    fn render_header(&mut self, ui: &mut Ui) {
        ui.horizontal(|ui| {
            ui.heading(
                RichText::new("Photo Feed")
                    .color(self.theme.highlight)
                    .size(24.0),
            );

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let theme_icon = if self.is_dark_mode { "☀" } else { "☾" };
                let theme_btn = ui.add(
                    egui::Button::new(
                        RichText::new(theme_icon)
                            .color(self.theme.button_foreground)
                            .size(22.0),
                    )
                    .min_size(egui::Vec2::new(32.0, 32.0))
                    .corner_radius(CornerRadius::same(16))
                    .fill(self.theme.button_background),
                );

                if theme_btn.hovered() {
                    ui.output_mut(|o| o.cursor_icon = egui::CursorIcon::PointingHand);
                }

                if theme_btn.clicked() {
                    self.toggle_theme();
                }
            });
        });

        ui.add_space(4.0);
        ui.add(egui::Separator::default().spacing(8.0));
    }

    fn render_feed(&mut self, ui: &mut Ui) {
        let items = match self.feed.state() {
            FeedState::Loading => {
                ui.vertical_centered(|ui| {
                    ui.add_space(40.0);
                    ui.add(egui::Spinner::new().size(40.0));
                });
                return;
            }
            FeedState::Failed => {
                ui.vertical_centered(|ui| {
                    ui.add_space(40.0);
                    ui.label(
                        RichText::new("Oops! Something went wrong")
                            .color(self.theme.secondary_text)
                            .size(18.0),
                    );
                });
                return;
            }
            FeedState::Loaded(_) => self.feed.items_handle(),
        };

        ScrollArea::vertical()
            .id_salt("feed_scroll_area")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for item in items.iter() {
                    self.render_card(ui, item);
                }
                ui.add_space(20.0);
            });
    }

    fn render_card(&mut self, ui: &mut Ui, item: &ImageItem) {
        egui::Frame::new()
            .fill(self.theme.card_background)
            .corner_radius(CornerRadius::same(8))
            .stroke(Stroke::new(1.0, self.theme.separator))
            .inner_margin(12.0)
            .outer_margin(egui::vec2(8.0, 6.0))
            .show(ui, |ui| {
                // Author row with the comments affordance on the right
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(&item.author)
                            .color(self.theme.text)
                            .size(16.0)
                            .strong(),
                    );

                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let count = self.controller.comment_count(item.id);
                        let link = ui.add(
                            egui::Label::new(
                                RichText::new(format!("{} comments", count))
                                    .color(self.theme.highlight)
                                    .size(14.0),
                            )
                            .sense(egui::Sense::click()),
                        );

                        if link.hovered() {
                            ui.output_mut(|o| o.cursor_icon = egui::CursorIcon::PointingHand);
                        }

                        if link.clicked() {
                            self.controller.open_comments(item.id);
                        }
                    });
                });

                ui.add_space(8.0);

                // Square photo area; spinner while the bytes are in flight.
                // The fetch starts only once the photo would be on screen,
                // so scrolling the listing doesn't pull every photo at once.
                let side = ui.available_width();
                let photo_rect =
                    egui::Rect::from_min_size(ui.cursor().min, egui::vec2(side, side));
                if ui.is_rect_visible(photo_rect) {
                    self.request_photo(item.id);
                }

                if let Some(tex) = self.photo_textures.get(&item.id) {
                    let photo = ui.add(
                        egui::Image::from_texture(tex)
                            .fit_to_exact_size(egui::vec2(side, side))
                            .sense(egui::Sense::click()),
                    );

                    if photo.hovered() {
                        ui.output_mut(|o| o.cursor_icon = egui::CursorIcon::PointingHand);
                    }

                    if photo.clicked() {
                        self.open_link(&image_url_for(item.id));
                    }
                } else if self.photo_requests.has_failed(item.id) {
                    ui.allocate_ui(egui::vec2(side, 60.0), |ui| {
                        ui.centered_and_justified(|ui| {
                            ui.label(
                                RichText::new("Couldn't load this photo")
                                    .color(self.theme.secondary_text)
                                    .italics(),
                            );
                        });
                    });
                } else {
                    ui.allocate_ui(egui::vec2(side, side), |ui| {
                        ui.centered_and_justified(|ui| {
                            ui.add(egui::Spinner::new().size(32.0));
                        });
                    });
                }
            });
    }

    fn render_comments_screen(&mut self, ui: &mut Ui) {
        let Some(item_id) = self.controller.selected_item() else {
            // Visible with nothing selected shouldn't happen; recover by
            // falling back to the feed.
            self.controller.close_comments();
            return;
        };

        // Navigation bar
        ui.horizontal(|ui| {
            let close_btn = ui.add(
                egui::Button::new(
                    RichText::new("Close")
                        .color(self.theme.highlight)
                        .size(14.0),
                )
                .corner_radius(CornerRadius::same(6))
                .fill(self.theme.button_background),
            );

            if close_btn.clicked() {
                self.comment_input.clear();
                self.controller.close_comments();
                return;
            }

            ui.with_layout(egui::Layout::centered_and_justified(egui::Direction::LeftToRight), |ui| {
                ui.label(
                    RichText::new("Comments")
                        .color(self.theme.text)
                        .size(16.0)
                        .strong(),
                );
            });
        });

        if !self.controller.comments_visible() {
            return;
        }

        ui.add(egui::Separator::default().spacing(8.0));

        // Comment input, submits on Enter; empty input is ignored
        let input = ui.add(
            egui::TextEdit::singleline(&mut self.comment_input)
                .hint_text("Leave a comment")
                .desired_width(f32::INFINITY),
        );

        if input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            let text = self.comment_input.trim().to_string();
            if !text.is_empty() {
                self.controller.submit_comment(&text);
                self.comment_input.clear();
                self.needs_repaint = true;
            }
            input.request_focus();
        }

        ui.add(egui::Separator::default().spacing(8.0));

        let comments = self.controller.comments_for(item_id).to_vec();

        ScrollArea::vertical()
            .id_salt("comments_scroll_area")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                if comments.is_empty() {
                    ui.vertical_centered(|ui| {
                        ui.add_space(20.0);
                        ui.label(
                            RichText::new("No comments yet. Be the first!")
                                .color(self.theme.secondary_text)
                                .italics(),
                        );
                    });
                }

                for comment in &comments {
                    egui::Frame::new()
                        .fill(self.theme.card_background)
                        .corner_radius(CornerRadius::same(6))
                        .stroke(Stroke::new(1.0, self.theme.separator))
                        .inner_margin(10.0)
                        .outer_margin(egui::vec2(4.0, 3.0))
                        .show(ui, |ui| {
                            ui.label(RichText::new(comment).color(self.theme.text).size(14.0));
                        });
                }

                ui.add_space(20.0);
            });
    }
}

impl eframe::App for PhotoFeedApp {
    // Save the theme preference when the app is closing
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        storage.set_string("is_dark_mode", self.is_dark_mode.to_string());
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.theme.apply_to_ctx(ctx);

        // First frame: hydrate comments and fetch the feed, once each
        if !self.started {
            self.started = true;
            self.controller.start_hydration();
            self.feed.start(&self.feed_client);
        }

        if self.controller.poll_hydration() {
            self.needs_repaint = true;
        }
        if self.feed.poll() {
            self.needs_repaint = true;
        }
        self.poll_photos(ctx);

        // Background completions don't wake the event loop on their own,
        // so keep polling at a low rate while work is outstanding
        if self.feed.is_loading()
            || self.controller.is_hydrating()
            || self.photo_requests.any_in_flight()
        {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        if self.needs_repaint {
            ctx.request_repaint();
            self.needs_repaint = false;
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_header(ui);

            if self.controller.comments_visible() {
                self.render_comments_screen(ui);
            } else {
                self.render_feed(ui);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::PhotoRequests;

    #[test]
    fn a_photo_is_requested_at_most_once() {
        let mut requests = PhotoRequests::new();

        assert!(requests.try_begin(1));
        assert!(!requests.try_begin(1));

        requests.finish(1, true);
        assert!(!requests.try_begin(1));
    }

    #[test]
    fn a_failed_photo_stays_failed() {
        let mut requests = PhotoRequests::new();

        assert!(requests.try_begin(1));
        requests.finish(1, false);

        assert!(requests.has_failed(1));
        assert!(!requests.try_begin(1));
    }

    #[test]
    fn in_flight_fetches_are_capped() {
        let mut requests = PhotoRequests::new();

        for id in 0..PhotoRequests::MAX_IN_FLIGHT as i64 {
            assert!(requests.try_begin(id));
        }
        assert!(requests.any_in_flight());
        assert!(!requests.try_begin(999));

        // A completed fetch frees a slot
        requests.finish(0, true);
        assert!(requests.try_begin(999));
    }

    #[test]
    fn a_thousand_item_listing_does_not_fan_out() {
        let mut requests = PhotoRequests::new();

        let started = (0..1000).filter(|id| requests.try_begin(*id)).count();
        assert_eq!(started, PhotoRequests::MAX_IN_FLIGHT);
    }
}

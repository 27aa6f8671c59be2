//! Ratatui-based terminal UI.
//!
//! The TUI stitches a synthetic tile pair and lets the user retune the
//! pipeline live. Each change reruns the same cached `MosaicSession` the CLI
//! uses, so only the stages the change affects are recomputed.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use log::{info, warn};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
};

use crate::app::pipeline::{MosaicInputs, MosaicRun, MosaicSession, SessionStats};
use crate::data::{SceneSpec, SyntheticScene, generate_scene};
use crate::domain::{Axis, MosaicConfig, OverlapMask};
use crate::error::AppError;
use crate::plot::{PlotPoint, curve_points};
use crate::report::compute_residuals;

mod plotters_chart;

use plotters_chart::GradientPlottersChart;

const FIELD_COUNT: usize = 5;

/// Start the TUI.
pub fn run(spec: SceneSpec, config: MosaicConfig, channel: usize) -> Result<(), AppError> {
    let mut app = App::new(spec, config, channel)?;

    let _guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal =
        Terminal::new(backend).map_err(|e| AppError::new(4, format!("Failed to initialize terminal: {e}")))?;

    app.event_loop(&mut terminal)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::new(4, format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::new(4, format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

struct App {
    spec: SceneSpec,
    scene: SyntheticScene,
    mask: OverlapMask,
    config: MosaicConfig,
    session: MosaicSession,
    run: Option<MosaicRun>,
    /// Cache counters after the last rerun, and their change from the one before.
    stats: SessionStats,
    delta: (u64, u64),
    channel: usize,
    selected_field: usize,
    status: String,
}

impl App {
    fn new(spec: SceneSpec, config: MosaicConfig, channel: usize) -> Result<Self, AppError> {
        let scene = generate_scene(&spec)?;
        let mask = OverlapMask::from_coverage(&scene.reference, &scene.target)?;
        let channel = channel.min(spec.channels.saturating_sub(1));
        let mut app = Self {
            session: MosaicSession::new(config.cache_capacity),
            spec,
            scene,
            mask,
            config,
            run: None,
            stats: SessionStats::default(),
            delta: (0, 0),
            channel,
            selected_field: 0,
            status: String::new(),
        };
        app.rerun();
        Ok(app)
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::new(4, format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100)).map_err(|e| AppError::new(4, format!("Event poll error: {e}")))? {
                continue;
            }

            match event::read().map_err(|e| AppError::new(4, format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code)? {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool, AppError> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Up => self.selected_field = self.selected_field.saturating_sub(1),
            KeyCode::Down => {
                if self.selected_field + 1 < FIELD_COUNT {
                    self.selected_field += 1;
                }
            }
            KeyCode::Left => self.adjust_field(-1),
            KeyCode::Right => self.adjust_field(1),
            KeyCode::Char('b') => {
                self.config.blend_mode = self.config.blend_mode.next();
                self.rerun();
            }
            KeyCode::Char('g') => {
                self.config.gradient_axes = self.config.gradient_axes.next();
                self.rerun();
            }
            KeyCode::Char('c') => self.cycle_channel(1),
            KeyCode::Char('r') => self.reseed()?,
            KeyCode::Char('x') => {
                self.session.clear();
                self.status = "Caches cleared.".to_string();
            }
            KeyCode::Char('d') => {
                if let Some(run) = &self.run {
                    match crate::debug::write_debug_bundle(run, &self.config, Some(&self.spec)) {
                        Ok(path) => {
                            self.status = format!("Wrote debug bundle: {}", path.display());
                        }
                        Err(err) => {
                            self.status = format!("Debug write failed: {err}");
                        }
                    }
                } else {
                    self.status = "No mosaic to dump.".to_string();
                }
            }
            _ => {}
        }

        Ok(false)
    }

    fn adjust_field(&mut self, delta: i32) {
        let up = delta >= 0;
        match self.selected_field {
            0 => {
                let step = 4;
                let next = if up {
                    self.config.cell_size.saturating_add(step)
                } else {
                    self.config.cell_size.saturating_sub(step)
                };
                self.config.cell_size = next.max(step);
            }
            1 => {
                let next = self.config.rejection_sigma + if up { 0.25 } else { -0.25 };
                self.config.rejection_sigma = next.max(0.5);
            }
            2 => {
                self.config.blend_mode = if up {
                    self.config.blend_mode.next()
                } else {
                    self.config.blend_mode.prev()
                };
            }
            3 => {
                self.config.gradient_axes = self.config.gradient_axes.next();
            }
            4 => {
                self.cycle_channel(if up { 1 } else { -1 });
                return;
            }
            _ => return,
        }
        self.rerun();
    }

    fn cycle_channel(&mut self, delta: isize) {
        let n = self.spec.channels.max(1) as isize;
        self.channel = (self.channel as isize + delta).rem_euclid(n) as usize;
        self.status = format!("channel {}", self.channel);
    }

    fn reseed(&mut self) -> Result<(), AppError> {
        self.spec.seed = self.spec.seed.wrapping_add(1);
        self.scene = generate_scene(&self.spec)?;
        self.mask = OverlapMask::from_coverage(&self.scene.reference, &self.scene.target)?;
        self.rerun();
        Ok(())
    }

    /// Rerun the pipeline; failures land in the status line and keep the last good run.
    fn rerun(&mut self) {
        let inputs = MosaicInputs::new(&self.scene.reference, &self.scene.target, &self.mask)
            .with_stars(&self.scene.stars)
            .with_headers(&self.scene.reference_header, &self.scene.target_header);

        match self.session.run(&inputs, &self.config, None) {
            Ok(run) => {
                let stats = self.session.stats();
                self.delta = (
                    stats.hits().saturating_sub(self.stats.hits()),
                    stats.misses().saturating_sub(self.stats.misses()),
                );
                self.stats = stats;
                self.status = format!(
                    "cell {} | σ {:.2} | {} | gradient {:?}",
                    self.config.cell_size,
                    self.config.rejection_sigma,
                    self.config.blend_mode.display_name(),
                    self.config.gradient_axes
                );
                self.run = Some(run);
            }
            Err(err) => {
                warn!("tui rerun failed: {err}");
                self.status = format!("Run failed: {err}");
            }
        }
        info!("tui cache: {} hit(s), {} miss(es) on last rerun", self.delta.0, self.delta.1);
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut lines: Vec<Line> = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("seam", Style::default().fg(Color::Cyan)),
            Span::raw(" - two-tile mosaic tuner"),
        ]));

        let (w, h, c) = self.scene.reference.dims();
        let samples = self.run.as_ref().map(|r| r.solution.samples.len()).unwrap_or(0);
        lines.push(Line::from(Span::styled(
            format!(
                "scene {w}x{h}x{c} seed {} | overlap {} px | samples {samples} | cache: last {} hit / {} miss, total {} / {}",
                self.spec.seed,
                self.mask.count(),
                self.delta.0,
                self.delta.1,
                self.stats.hits(),
                self.stats.misses()
            ),
            Style::default().fg(Color::Gray),
        )));

        if let Some(d) = self.run.as_ref().and_then(|r| r.result.channels.get(self.channel)) {
            let truth = self.scene.truth.get(self.channel);
            lines.push(Line::from(Span::styled(
                format!(
                    "ch{}: {:?} scale={:.5} (true {:.5}) offset={:.5} rms={:.3e} acc={} rej={} knots={}",
                    d.channel,
                    d.mode,
                    d.scale,
                    truth.map(|t| t.scale).unwrap_or(f64::NAN),
                    d.offset,
                    d.rms,
                    d.accepted,
                    d.rejected,
                    d.gradient_knots
                ),
                Style::default().fg(Color::Gray),
            )));
        }

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(FIELD_COUNT as u16 + 2)])
            .split(area);

        self.draw_chart(frame, chunks[0]);
        self.draw_settings(frame, chunks[1]);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default().title("Gradient").borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let Some(series) = self.run.as_ref().and_then(|run| chart_series(run, self.channel)) else {
            let msg = Paragraph::new("No gradient curve for this channel (press g to change axes).")
                .style(Style::default().fg(Color::Yellow));
            frame.render_widget(msg, inner);
            return;
        };

        let widget = GradientPlottersChart {
            curve: &series.curve,
            accepted: &series.accepted,
            rejected: &series.rejected,
            x_bounds: series.x_bounds,
            y_bounds: series.y_bounds,
            x_label: series.axis.label(),
            y_label: "residual".to_string(),
            fmt_x: fmt_axis_x,
            fmt_y: fmt_axis_y,
        };
        frame.render_widget(widget, inner);
    }

    fn draw_settings(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let items = vec![
            ListItem::new(format!("Cell size: {} px", self.config.cell_size)),
            ListItem::new(format!("Rejection: {:.2} σ", self.config.rejection_sigma)),
            ListItem::new(format!("Blend: {}", self.config.blend_mode.display_name())),
            ListItem::new(format!("Gradient: {:?}", self.config.gradient_axes)),
            ListItem::new(format!("Channel: {}", self.channel)),
        ];

        let list = List::new(items)
            .block(Block::default().title("Settings").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("» ");

        let mut state = ratatui::widgets::ListState::default();
        state.select(Some(self.selected_field));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "↑/↓ select  ←/→ adjust  b blend  g gradient  c channel  r reseed  x clear cache  d debug  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

struct ChartSeries {
    axis: Axis,
    curve: Vec<(f64, f64)>,
    accepted: Vec<(f64, f64)>,
    rejected: Vec<(f64, f64)>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

/// Series for the first gradient curve of `channel`, or `None` without one.
fn chart_series(run: &MosaicRun, channel: usize) -> Option<ChartSeries> {
    let corr = run.solution.corrections.get(channel)?;
    let curve = corr.gradient.curves().next()?;
    let axis = curve.axis;
    let extent = match axis {
        Axis::X => run.result.image.width(),
        Axis::Y => run.result.image.height(),
    };
    let x_bounds = [0.0, (extent.max(2) - 1) as f64];

    let residuals = compute_residuals(&run.solution.samples, corr, channel).ok()?;
    let points = curve_points(&residuals, &corr.gradient, axis);
    let (rejected, accepted): (Vec<PlotPoint>, Vec<PlotPoint>) = points.into_iter().partition(|p| p.rejected);
    let accepted: Vec<(f64, f64)> = accepted.iter().map(|p| (p.position, p.value)).collect();
    let rejected: Vec<(f64, f64)> = rejected.iter().map(|p| (p.position, p.value)).collect();

    let n = 200usize;
    let line: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let p = x_bounds[0] + (i as f64 / (n as f64 - 1.0)) * (x_bounds[1] - x_bounds[0]);
            (p, curve.eval(p))
        })
        .collect();

    // Rejected outliers would flatten the view, so they don't widen the bounds.
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(_, y) in accepted.iter().chain(&line) {
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_max <= y_min {
        y_min = -1.0;
        y_max = 1.0;
    }
    let pad = ((y_max - y_min).abs() * 0.05).max(1e-12);

    Some(ChartSeries {
        axis,
        curve: line,
        accepted,
        rejected,
        x_bounds,
        y_bounds: [y_min - pad, y_max + pad],
    })
}

fn fmt_axis_x(v: f64) -> String {
    format!("{v:.0}")
}

fn fmt_axis_y(v: f64) -> String {
    format!("{v:.3}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlendMode, GradientAxes};

    fn app() -> App {
        let spec = SceneSpec {
            width: 128,
            height: 64,
            channels: 2,
            overlap: 64,
            star_count: 5,
            sky_ramp: 0.3,
            ..SceneSpec::default()
        };
        let config = MosaicConfig {
            cell_size: 8,
            ..MosaicConfig::default()
        };
        App::new(spec, config, 0).unwrap()
    }

    #[test]
    fn blend_change_is_served_from_cache() {
        let mut app = app();
        assert!(app.run.is_some());
        let misses = app.stats.misses();

        app.handle_key(KeyCode::Char('b')).unwrap();
        assert_eq!(app.config.blend_mode, BlendMode::RandomDither);
        assert_eq!(app.stats.misses(), misses);
        assert!(app.delta.0 > 0);
    }

    #[test]
    fn gradient_change_refits_only_the_gradient() {
        let mut app = app();
        let before = app.stats;
        app.handle_key(KeyCode::Char('g')).unwrap();
        assert_eq!(app.config.gradient_axes, GradientAxes::Y);
        assert_eq!(app.stats.samples.misses, before.samples.misses);
        assert_eq!(app.stats.fits.misses, before.fits.misses);
        assert_eq!(app.stats.gradients.misses, before.gradients.misses + 2);
    }

    #[test]
    fn channel_selection_wraps() {
        let mut app = app();
        app.selected_field = 4;
        app.handle_key(KeyCode::Left).unwrap();
        assert_eq!(app.channel, 1);
        app.handle_key(KeyCode::Char('c')).unwrap();
        assert_eq!(app.channel, 0);
    }

    #[test]
    fn quit_key_ends_loop() {
        let mut app = app();
        assert!(app.handle_key(KeyCode::Char('q')).unwrap());
        assert!(!app.handle_key(KeyCode::Char('z')).unwrap());
    }

    #[test]
    fn chart_series_follows_curve_axis() {
        let app = app();
        let run = app.run.as_ref().unwrap();
        let series = chart_series(run, 0).unwrap();
        assert_eq!(series.axis, Axis::X);
        assert_eq!(series.x_bounds, [0.0, 127.0]);
        assert_eq!(series.curve.len(), 200);
        assert!(!series.accepted.is_empty());
        assert!(series.y_bounds[0] < series.y_bounds[1]);
    }

    #[test]
    fn chart_series_splits_samples_by_rejection() {
        let app = app();
        let run = app.run.as_ref().unwrap();
        let series = chart_series(run, 0).unwrap();
        let corr = &run.solution.corrections[0];
        assert_eq!(series.accepted.len(), corr.fit.accepted.len());
        assert_eq!(series.rejected.len(), corr.fit.rejected.len());
        assert_eq!(series.accepted.len() + series.rejected.len(), run.solution.samples.len());
    }
}

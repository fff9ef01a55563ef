use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::interval;

use crate::coordinator::{PlayState, PlaybackCoordinator};
use crate::player::{PlayerEvent, TickPlayer};
use crate::settings::{SettingKey, SettingValue, SettingsSnapshot, SettingsStore, SharedStore};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const BLINK_WINDOW: Duration = Duration::from_millis(80);
const MESSAGE_TTL: Duration = Duration::from_secs(3);
const SIDEBAR_WIDTH: u16 = 34;

type Coordinator = PlaybackCoordinator<TickPlayer, SharedStore>;

struct AppState {
    coordinator: Coordinator,
    settings: SettingsSnapshot,
    store: SharedStore,
    sidebar_open: bool,
    last_tick: Option<Instant>,
    message: Option<(String, Instant)>,
    is_running: bool,
}

pub async fn run(
    coordinator: Coordinator,
    player_events: UnboundedReceiver<PlayerEvent>,
    settings: SettingsSnapshot,
    store: SharedStore,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = AppState {
        coordinator,
        settings,
        store,
        sidebar_open: false,
        last_tick: None,
        message: None,
        is_running: true,
    };

    let result = event_loop(&mut terminal, &mut app, player_events).await;

    // Taps from this session are meaningless to the next one.
    app.coordinator.reset_taps();

    disable_raw_mode()?;
    execute!(std::io::stdout(), LeaveAlternateScreen)?;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut AppState,
    mut player_events: UnboundedReceiver<PlayerEvent>,
) -> Result<()> {
    let mut input = EventStream::new();
    let mut frames = interval(FRAME_INTERVAL);

    while app.is_running {
        if app
            .message
            .as_ref()
            .is_some_and(|(_, since)| since.elapsed() > MESSAGE_TTL)
        {
            app.message = None;
        }

        terminal.draw(|frame| app.render(frame))?;

        tokio::select! {
            maybe_event = input.next() => match maybe_event {
                Some(Ok(Event::Key(key))) => app.handle_key_event(key),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => app.is_running = false,
            },
            Some(event) = player_events.recv() => app.handle_player_event(event),
            _ = frames.tick() => {}
        }
    }

    Ok(())
}

impl AppState {
    fn handle_key_event(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.is_running = false,
            KeyCode::Char(' ') => self.coordinator.toggle_play(),
            KeyCode::Char('t') => {
                self.coordinator.tap(Instant::now());
            }
            KeyCode::Char('k') | KeyCode::Up => self.change_tempo(1.0),
            KeyCode::Char('j') | KeyCode::Down => self.change_tempo(-1.0),
            KeyCode::Char('s') => self.sidebar_open = !self.sidebar_open,
            KeyCode::Char('m') => self.toggle_setting(SettingKey::MuteSound),
            KeyCode::Char('b') => self.toggle_setting(SettingKey::BlinkOnTick),
            KeyCode::Char('i') => self.toggle_setting(SettingKey::ShowIndicator),
            KeyCode::Char('d') => self.toggle_setting(SettingKey::DarkMode),
            KeyCode::Char('c') => self.toggle_setting(SettingKey::CustomBackgroundColor),
            _ => {}
        }
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Tick => self.last_tick = Some(Instant::now()),
            PlayerEvent::StateChanged { token, playing } => {
                self.coordinator.on_player_state_changed(token, playing);
            }
        }
    }

    fn change_tempo(&mut self, delta: f64) {
        let target = self.coordinator.snapshot().bpm + delta;
        if let Err(err) = self.coordinator.set_tempo(target) {
            self.message = Some((err.to_string(), Instant::now()));
        }
    }

    fn toggle_setting(&mut self, key: SettingKey) {
        let checked = match key {
            SettingKey::MuteSound => {
                self.settings.mute_sound = !self.settings.mute_sound;
                self.coordinator.set_muted(self.settings.mute_sound);
                self.settings.mute_sound
            }
            SettingKey::BlinkOnTick => {
                self.settings.blink_on_tick = !self.settings.blink_on_tick;
                self.settings.blink_on_tick
            }
            SettingKey::ShowIndicator => {
                self.settings.show_indicator = !self.settings.show_indicator;
                self.settings.show_indicator
            }
            SettingKey::DarkMode => {
                self.settings.dark_mode = !self.settings.dark_mode;
                self.settings.dark_mode
            }
            SettingKey::CustomBackgroundColor => {
                self.settings.custom_background_color = !self.settings.custom_background_color;
                self.settings.custom_background_color
            }
            SettingKey::Tempo => return,
        };

        self.store.set(key, SettingValue::Bool(checked));
    }

    fn colors(&self) -> (Color, Color) {
        if self.settings.custom_background_color {
            (Color::Rgb(24, 28, 38), Color::White)
        } else if self.settings.dark_mode {
            (Color::Black, Color::White)
        } else {
            (Color::White, Color::Black)
        }
    }

    fn render(&mut self, frame: &mut Frame) {
        let (bg, fg) = self.colors();
        frame.render_widget(
            Block::default().style(Style::default().bg(bg).fg(fg)),
            frame.area(),
        );

        let (main_area, sidebar_area) = if self.sidebar_open {
            let chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Min(20), Constraint::Length(SIDEBAR_WIDTH)])
                .split(frame.area());
            (chunks[0], Some(chunks[1]))
        } else {
            (frame.area(), None)
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(80), Constraint::Percentage(20)].as_ref())
            .split(main_area);

        self.render_tempo(frame, chunks[0]);
        self.render_controls(frame, chunks[1]);

        if let Some(area) = sidebar_area {
            self.render_sidebar(frame, area);
        }
    }

    fn render_tempo(&self, frame: &mut Frame, area: Rect) {
        let state = self.coordinator.snapshot();

        let status = match self.coordinator.play_state() {
            PlayState::Playing => "[playing]".green(),
            PlayState::Starting => "[starting]".yellow(),
            PlayState::Stopped => "[stopped]".red(),
        };

        let indicator = if self.settings.show_indicator && self.settings.blink_on_tick {
            let on_beat = self
                .last_tick
                .is_some_and(|tick| tick.elapsed() < BLINK_WINDOW);
            if !state.is_playing || on_beat {
                "●"
            } else {
                " "
            }
        } else {
            " "
        };

        let mut lines = vec![
            Line::from(""),
            Line::from(indicator),
            Line::from(""),
            Line::from(vec![
                Span::styled(
                    format!("{:.0}", state.bpm),
                    Style::default().fg(Color::Green),
                ),
                Span::raw(" BPM  "),
                status,
            ]),
        ];

        if self.coordinator.tap_count() > 0 {
            lines.push(Line::from(
                format!("taps: {}", self.coordinator.tap_count()).dim(),
            ));
        }

        if let Some((message, _)) = &self.message {
            lines.push(Line::from(""));
            lines.push(Line::from(message.clone().red()));
        }

        let block = Paragraph::new(lines).centered().block(
            Block::default()
                .borders(Borders::ALL)
                .title(Line::from(" tempotap ".blue().bold()).centered()),
        );
        frame.render_widget(block, area);
    }

    fn render_controls(&self, frame: &mut Frame, area: Rect) {
        let controls_text = vec![Line::from(vec![
            "Tap: ".into(),
            "<T>".blue(),
            " Play/Stop: ".into(),
            "<Space>".blue(),
            " BPM: ".into(),
            "<J>/<K>".blue(),
            " Settings: ".into(),
            "<S>".blue(),
            " Quit: ".into(),
            "<Q>".blue(),
        ])
        .centered()];

        let block = Paragraph::new(controls_text).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Line::from(" Controls ".yellow().bold()).centered()),
        );
        frame.render_widget(block, area);
    }

    fn render_sidebar(&self, frame: &mut Frame, area: Rect) {
        let rows = [
            ("Show beat indicator", self.settings.show_indicator, 'i'),
            ("Mute sound", self.settings.mute_sound, 'm'),
            ("Blink on tick", self.settings.blink_on_tick, 'b'),
            ("Dark mode", self.settings.dark_mode, 'd'),
            (
                "Custom background",
                self.settings.custom_background_color,
                'c',
            ),
        ];

        let mut lines = vec![Line::from("")];
        for (label, checked, hint) in rows {
            lines.push(Line::from(vec![
                Span::raw(if checked { "[x] " } else { "[ ] " }),
                Span::raw(label),
                Span::styled(format!("  <{hint}>"), Style::default().fg(Color::Blue)),
            ]));
        }

        let block = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Line::from(" Settings ".bold()).centered()),
        );
        frame.render_widget(block, area);
    }
}

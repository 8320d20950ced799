//! Overview (queue counts and in-flight tasks per worker)
//! Queue (next 5 pending tasks)
//! Tasks (latest 20 tasks)

use std::{
  error::Error,
  io,
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode},
  execute,
  terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use tui::{
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, List, ListItem, Paragraph, Tabs},
  Terminal,
};
use tokio::runtime::Runtime;
use taskproc::{
  config::Config,
  database::setup_database,
  store::PgTaskStore,
  Task, TaskError, TaskRepository, TaskStats, TaskStatus,
};

const QUEUE_PREVIEW: u64 = 5;
const RECENT_TASKS: u64 = 20;
const REFRESH: Duration = Duration::from_secs(2);

struct TaskInfo {
  id: String,
  title: String,
  status: TaskStatus,
  attempts: i32,
  claimed_by: Option<String>,
  created_at: String,
}

impl From<Task> for TaskInfo {
  fn from(task: Task) -> Self {
    let status = task.status();
    Self {
      id: task.id.to_string(),
      title: task.title,
      status,
      attempts: task.attempts,
      claimed_by: task.claimed_by,
      created_at: task.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
  }
}

#[derive(Clone, Copy)]
enum DashboardTab {
  Overview,
  Queue,
  Tasks,
}

struct App {
  current_tab: DashboardTab,
  stats: TaskStats,
  queued_tasks: Vec<TaskInfo>,
  recent_tasks: Vec<TaskInfo>,
  last_error: Option<String>,
}

impl App {
  fn new() -> Self {
    Self {
      current_tab: DashboardTab::Overview,
      stats: TaskStats::default(),
      queued_tasks: vec![],
      recent_tasks: vec![],
      last_error: None,
    }
  }

  fn next_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Queue,
      DashboardTab::Queue => DashboardTab::Tasks,
      DashboardTab::Tasks => DashboardTab::Overview,
    }
  }

  fn previous_tab(&mut self) {
    self.current_tab = match self.current_tab {
      DashboardTab::Overview => DashboardTab::Tasks,
      DashboardTab::Queue => DashboardTab::Overview,
      DashboardTab::Tasks => DashboardTab::Queue,
    }
  }

  /// Replace the data, keep the selected tab.
  fn refresh(&mut self, snapshot: App) {
    self.stats = snapshot.stats;
    self.queued_tasks = snapshot.queued_tasks;
    self.recent_tasks = snapshot.recent_tasks;
    self.last_error = snapshot.last_error;
  }
}

async fn fetch_state(repo: &TaskRepository) -> Result<App, TaskError> {
  let mut app = App::new();
  app.stats = repo.stats().await?;
  app.queued_tasks = repo
    .find_pending(QUEUE_PREVIEW)
    .await?
    .into_iter()
    .map(TaskInfo::from)
    .collect();
  app.recent_tasks = repo
    .find_all(RECENT_TASKS)
    .await?
    .into_iter()
    .map(TaskInfo::from)
    .collect();
  Ok(app)
}

fn main() -> Result<(), Box<dyn Error>> {
  let config = Config::from_env()?;
  let rt = Runtime::new()?;
  let db_pool = rt.block_on(setup_database(config.require_database_url()?))?;
  let repo = Arc::new(
    TaskRepository::new(Arc::new(PgTaskStore::new(db_pool))).with_call_timeout(config.store_timeout),
  );

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let (tx, rx) = std::sync::mpsc::channel::<App>();

  {
    let repo = repo.clone();
    thread::spawn(move || {
      loop {
        let app_state = rt.block_on(fetch_state(&repo)).unwrap_or_else(|e| {
          let mut app = App::new();
          app.last_error = Some(e.to_string());
          app
        });
        if tx.send(app_state).is_err() {
          break;
        }
        thread::sleep(REFRESH);
      }
    });
  }

  let mut app = App::new();
  let tick_rate = Duration::from_millis(500);
  let mut last_tick = Instant::now();

  loop {
    if let Ok(snapshot) = rx.try_recv() {
      app.refresh(snapshot);
    }
    terminal.draw(|f| ui(f, &app))?;

    let timeout = tick_rate
      .checked_sub(last_tick.elapsed())
      .unwrap_or_else(|| Duration::from_secs(0));
    if event::poll(timeout)? {
      if let CEvent::Key(key) = event::read()? {
        match key.code {
          KeyCode::Char('q') => break,
          KeyCode::Right => app.next_tab(),
          KeyCode::Left => app.previous_tab(),
          _ => {}
        }
      }
    }
    if last_tick.elapsed() >= tick_rate {
      last_tick = Instant::now();
    }
  }

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;
  Ok(())
}

fn status_style(status: TaskStatus) -> Style {
  match status {
    TaskStatus::Pending => Style::default().fg(Color::Yellow),
    TaskStatus::InFlight => Style::default().fg(Color::Cyan),
    TaskStatus::Processed => Style::default().fg(Color::Green),
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  let tab_titles = vec!["Overview", "Queue", "Tasks"];
  let tabs = Tabs::new(
    tab_titles
      .iter()
      .map(|t| Spans::from(Span::styled(*t, Style::default().fg(Color::Yellow)))
      )
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Dashboard Tabs"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(match app.current_tab {
      DashboardTab::Overview => 0,
      DashboardTab::Queue => 1,
      DashboardTab::Tasks => 2,
    });
  f.render_widget(tabs, chunks[0]);

  match app.current_tab {
    DashboardTab::Overview => render_overview(f, app, chunks[1]),
    DashboardTab::Queue => render_queue(f, app, chunks[1]),
    DashboardTab::Tasks => render_tasks(f, app, chunks[1]),
  }

  let footer_text = match &app.last_error {
    Some(e) => format!("←/→: Switch Tabs | q: Quit | last refresh failed: {}", e),
    None => "←/→: Switch Tabs | q: Quit".to_string(),
  };
  let footer = Paragraph::new(footer_text)
    .style(Style::default().fg(Color::White))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, chunks[2]);
}

fn render_overview<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let chunks = Layout::default()
    .direction(Direction::Horizontal)
    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
    .split(area);

  let stats = &app.stats;
  let count_items = vec![
    ListItem::new(Spans::from(Span::styled(format!("Total: {}", stats.total), Style::default().add_modifier(Modifier::BOLD)))),
    ListItem::new(Spans::from(Span::styled(format!("Pending: {}", stats.pending), status_style(TaskStatus::Pending)))),
    ListItem::new(Spans::from(Span::styled(format!("In flight: {}", stats.in_flight), status_style(TaskStatus::InFlight)))),
    ListItem::new(Spans::from(Span::styled(format!("Processed: {}", stats.processed), status_style(TaskStatus::Processed)))),
  ];
  let counts_list = List::new(count_items)
    .block(Block::default().borders(Borders::ALL).title("Queue Counts"));
  f.render_widget(counts_list, chunks[0]);

  let active_tasks: Vec<ListItem> = app.recent_tasks.iter().filter(|t| t.status == TaskStatus::InFlight).map(|t| {
    ListItem::new(Spans::from(vec![
      Span::raw(format!("{}: {} (attempt {})", t.claimed_by.as_deref().unwrap_or("?"), t.title, t.attempts))
    ]))
  }).collect();
  let tasks_list = List::new(if active_tasks.is_empty() { vec![ListItem::new(Spans::from(Span::raw("No tasks in flight")))] } else { active_tasks })
    .block(Block::default().borders(Borders::ALL).title("In Flight (recent)"));
  f.render_widget(tasks_list, chunks[1]);
}

fn render_queue<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app.queued_tasks.iter().map(|t| {
    ListItem::new(Spans::from(vec![
      Span::styled(format!("{} ", t.id), Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
      Span::raw(format!("{} | created {} | attempts {}", t.title, t.created_at, t.attempts))
    ]))
  }).collect();
  let header = format!("Next {} Pending Tasks (pending total: {})", QUEUE_PREVIEW, app.stats.pending);
  let tasks_list = List::new(task_items)
    .block(Block::default().borders(Borders::ALL).title(header));
  f.render_widget(tasks_list, area);
}

fn render_tasks<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let task_items: Vec<ListItem> = app.recent_tasks.iter().map(|t| {
    ListItem::new(Spans::from(vec![
      Span::styled(&t.created_at, Style::default().fg(Color::Green)),
      Span::raw(" - "),
      Span::styled(format!("[{}] ", t.status.label()), status_style(t.status)),
      Span::raw(&t.title),
    ]))
  }).collect();
  let tasks_list = List::new(task_items)
    .block(Block::default().borders(Borders::ALL).title("Latest Tasks"));
  f.render_widget(tasks_list, area);
}

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pdfinsight_core::config::CONFIG_FILENAME;
use pdfinsight_core::{
    export_artifact, newest_first, write_export, AppConfig, BoundingBox, InsightId, ResultRow,
    ResultStatus, SurfaceUpdate, Workbench, WorkbenchError,
};
use pdfinsight_genai::{ApiKey, ApiKeyGate, GeminiClient, KeyPrompt};
use pdfinsight_render::PdfiumProvider;
use pdfinsight_tty::{
    paint_selection, write_status_line, DrawParams, EventMapper, KittyRenderer, PageViewport,
    PointerAction, UiEvent, PAGE_IMAGE_ID, PREVIEW_IMAGE_ID,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdfinsight",
    version,
    about = "Select regions of PDF pages and turn them into explanations, slides, code or infographics"
)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory exported artifacts are written to
    #[arg(long = "export-dir")]
    export_dir: Option<PathBuf>,

    /// PDF files; `]` switches to the next one
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

/// Asks for a key on the terminal before raw mode is entered.
struct StdinKeyPrompt {
    env_var: String,
}

#[async_trait]
impl KeyPrompt for StdinKeyPrompt {
    async fn ask(&self) -> Result<Option<String>> {
        let message = format!(
            "No API key found in ${}. Paste a key (empty to quit): ",
            self.env_var
        );
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut stdout = io::stdout();
            write!(stdout, "{message}")?;
            stdout.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            let line = line.trim().to_owned();
            Ok((!line.is_empty()).then_some(line))
        })
        .await?
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdfinsight", "pdfinsight")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join(CONFIG_FILENAME));
    let config = AppConfig::load(&config_path)?;
    let export_dir = args
        .export_dir
        .clone()
        .or_else(|| config.export.directory.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let key = ApiKey::from_env(&config.generation.api_key_env);
    let gate = Arc::new(ApiKeyGate::new(
        key.clone(),
        Arc::new(StdinKeyPrompt {
            env_var: config.generation.api_key_env.clone(),
        }),
    ));
    let generator = Arc::new(GeminiClient::new(config.generation.clone(), key));
    let provider = Arc::new(PdfiumProvider::new()?);
    let mut workbench = Workbench::new(&config, gate, provider, generator);

    if !workbench.unlock().await? {
        bail!(
            "an API key is required; set ${} or enter one when prompted",
            config.generation.api_key_env
        );
    }

    let mut app = App::new(args.files, export_dir);
    app.open_current(&mut workbench).await;

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut event_mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        if dirty {
            if let Err(err) = app.redraw(&mut renderer, &mut workbench, &event_mapper) {
                warn!(?err, "redraw failed");
                app.status = format!("draw error: {err:#}");
            }
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ui_event = event_mapper.map_event(event::read()?);
            match app.handle(ui_event, &mut workbench).await {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }

        let applied = workbench.poll_completions();
        if !applied.is_empty() {
            dirty = true;
        }
    }

    renderer.delete_image(PAGE_IMAGE_ID)?;
    renderer.delete_image(PREVIEW_IMAGE_ID)?;
    renderer.clear_all()?;
    Ok(())
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

struct App {
    files: Vec<PathBuf>,
    file_index: usize,
    page: usize,
    focus: Option<InsightId>,
    viewport: Option<PageViewport>,
    export_dir: PathBuf,
    status: String,
    drawn_page: Option<PageFrame>,
    drawn_preview: Option<PreviewFrame>,
    needs_clear: bool,
}

/// What the page image on screen currently shows.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PageFrame {
    file_index: usize,
    page: usize,
    overlay: Option<BoundingBox>,
    viewport: PageViewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PreviewFrame {
    id: InsightId,
    column: u16,
    row: u16,
    columns: u16,
    rows: u16,
}

/// The page image is resent only when its pixels, overlay or placement changed.
fn page_needs_transmit(
    drawn: Option<&PageFrame>,
    next: &PageFrame,
    update: SurfaceUpdate,
) -> bool {
    update != SurfaceUpdate::Unchanged || drawn != Some(next)
}

impl App {
    fn new(files: Vec<PathBuf>, export_dir: PathBuf) -> Self {
        Self {
            files,
            file_index: 0,
            page: 0,
            focus: None,
            viewport: None,
            export_dir,
            status: String::new(),
            drawn_page: None,
            drawn_preview: None,
            needs_clear: true,
        }
    }

    async fn open_current(&mut self, workbench: &mut Workbench) {
        self.page = 0;
        self.focus = None;
        self.viewport = None;
        let path = &self.files[self.file_index];
        let loaded = match read_document(path) {
            Ok(bytes) => workbench.open_document(bytes).await,
            Err(err) => Err(WorkbenchError::Load(err)),
        };
        self.drawn_page = None;
        self.status = match loaded {
            Ok(pages) => {
                info!(?path, pages, "opened document");
                let name = workbench
                    .session()
                    .info()
                    .and_then(|info| info.metadata.label())
                    .unwrap_or_else(|| path.display().to_string());
                format!("{name} · {pages} pages · drag to select a region")
            }
            Err(err) => {
                warn!(?path, %err, "failed to open document");
                format!("{}: {err}", path.display())
            }
        };
    }

    async fn handle(&mut self, event: UiEvent, workbench: &mut Workbench) -> LoopAction {
        let result = match event {
            UiEvent::Quit => return LoopAction::Quit,
            UiEvent::None => return LoopAction::Continue,
            UiEvent::Resize => {
                self.needs_clear = true;
                Ok(())
            }
            UiEvent::Pointer { kind, column, row } => {
                let Some(action) = self.viewport.and_then(|vp| vp.translate(kind, column, row))
                else {
                    return LoopAction::Continue;
                };
                self.pointer(action, workbench)
            }
            UiEvent::NextPage { count } => {
                let last = workbench.session().page_count().saturating_sub(1);
                self.page = (self.page + count).min(last);
                Ok(())
            }
            UiEvent::PrevPage { count } => {
                self.page = self.page.saturating_sub(count);
                Ok(())
            }
            UiEvent::ZoomIn => workbench.zoom_in().map(drop),
            UiEvent::ZoomOut => workbench.zoom_out().map(drop),
            UiEvent::ResetZoom => workbench.reset_zoom().map(drop),
            UiEvent::Request(kind) => workbench.request(kind).map(|id| {
                self.focus = Some(id);
                self.status = format!("requested {}", kind.title().to_lowercase());
            }),
            UiEvent::FocusNext => {
                self.move_focus(workbench, 1);
                Ok(())
            }
            UiEvent::FocusPrev => {
                self.move_focus(workbench, -1);
                Ok(())
            }
            UiEvent::RemoveFocused => {
                if let Some(id) = self.focus.take() {
                    workbench.remove_result(&id);
                    self.move_focus(workbench, 0);
                }
                Ok(())
            }
            UiEvent::ExportFocused => {
                self.export_focused(workbench);
                Ok(())
            }
            UiEvent::CancelSelection => workbench.cancel_selection(),
            UiEvent::NextDocument => {
                self.file_index = (self.file_index + 1) % self.files.len();
                self.open_current(workbench).await;
                Ok(())
            }
        };

        if let Err(err) = result {
            self.status = err.to_string();
        }
        LoopAction::ContinueRedraw
    }

    fn pointer(&mut self, action: PointerAction, workbench: &mut Workbench) -> Result<(), WorkbenchError> {
        let committed = match action {
            PointerAction::Down(point) => {
                workbench.pointer_down(self.page, point)?;
                None
            }
            PointerAction::Move(point) => {
                workbench.pointer_move(self.page, point)?;
                None
            }
            PointerAction::Up(point) => {
                workbench.pointer_move(self.page, point)?;
                workbench.pointer_up(self.page)?
            }
            PointerAction::Leave => workbench.pointer_leave(self.page)?,
        };
        if let Some(selection) = committed {
            self.status = format!(
                "selected {:.0}x{:.0} px on page {} · e explain · s slide · c code · i infographic",
                selection.rect.width,
                selection.rect.height,
                selection.page_index + 1
            );
        }
        Ok(())
    }

    /// `step` 0 re-targets focus onto the newest result.
    fn move_focus(&mut self, workbench: &Workbench, step: isize) {
        let ids: Vec<InsightId> = workbench.insights().newest_first().map(|r| r.id).collect();
        if ids.is_empty() {
            self.focus = None;
            return;
        }
        let current = self
            .focus
            .and_then(|id| ids.iter().position(|candidate| *candidate == id));
        let next = match (current, step) {
            (Some(index), step) => (index as isize + step).rem_euclid(ids.len() as isize) as usize,
            (None, _) => 0,
        };
        self.focus = Some(ids[next]);
    }

    fn export_focused(&mut self, workbench: &Workbench) {
        let Some(result) = self.focus.and_then(|id| workbench.insights().get(&id)) else {
            self.status = "nothing to export".into();
            return;
        };
        let today = chrono::Local::now().date_naive();
        let Some(artifact) = export_artifact(result, today) else {
            self.status = "still generating".into();
            return;
        };
        self.status = match write_export(&self.export_dir, &artifact) {
            Ok(path) => format!("saved {}", path.display()),
            Err(err) => {
                warn!(?err, "export failed");
                format!("export failed: {err:#}")
            }
        };
    }

    fn redraw<W: Write>(
        &mut self,
        renderer: &mut KittyRenderer<W>,
        workbench: &mut Workbench,
        mapper: &EventMapper,
    ) -> Result<()> {
        let (total_cols, total_rows) = terminal::size()?;
        let (cell_width, cell_height) = cell_size(total_cols, total_rows);
        let page_cols = (total_cols as u32 * 3 / 5) as u16;
        let body_rows = total_rows.saturating_sub(1);

        renderer.begin_sync_update()?;
        if self.needs_clear {
            renderer.clear_all()?;
            self.drawn_page = None;
            self.drawn_preview = None;
            self.needs_clear = false;
        }

        self.viewport = None;
        if workbench.session().is_loaded() {
            let update = workbench.render_page(self.page)?;
            let session = workbench.session();
            if let Some(surface) = session.page(self.page).and_then(|p| p.surface()) {
                let overlay = session
                    .overlay()
                    .filter(|(page, _)| *page == self.page)
                    .map(|(_, rect)| rect);
                let viewport = PageViewport::fit(
                    0,
                    0,
                    page_cols,
                    body_rows,
                    surface.width,
                    surface.height,
                    cell_width,
                    cell_height,
                );
                let frame = PageFrame {
                    file_index: self.file_index,
                    page: self.page,
                    overlay,
                    viewport,
                };
                if page_needs_transmit(self.drawn_page.as_ref(), &frame, update) {
                    let painted = match overlay {
                        Some(rect) => paint_selection(surface, rect),
                        None => surface.clone(),
                    };
                    renderer.draw(
                        &painted,
                        DrawParams::at(
                            PAGE_IMAGE_ID,
                            0,
                            0,
                            viewport.columns as u32,
                            viewport.rows as u32,
                        ),
                    )?;
                    self.drawn_page = Some(frame);
                }
                self.viewport = Some(viewport);
            }
        } else if self.drawn_page.take().is_some() {
            renderer.delete_image(PAGE_IMAGE_ID)?;
        }

        let panel_col = page_cols.saturating_add(1);
        let panel_width = total_cols.saturating_sub(panel_col) as usize;
        self.draw_results(renderer, workbench, panel_col, panel_width, body_rows)?;

        let session = workbench.session();
        let mut status = format!(
            "p.{}/{} · {}%",
            self.page + 1,
            session.page_count().max(1),
            session.zoom().percent()
        );
        let pending = workbench.insights().pending_count();
        if pending > 0 {
            status.push_str(&format!(" · {pending} generating"));
        }
        if !self.status.is_empty() {
            status.push_str(" · ");
            status.push_str(&self.status);
        }
        if let Some(prefix) = mapper.pending_input() {
            status.push_str(&format!(" [{prefix}]"));
        }
        {
            let writer = renderer.writer();
            crossterm::queue!(
                writer,
                cursor::MoveTo(0, total_rows.saturating_sub(1)),
                Clear(ClearType::CurrentLine)
            )?;
            write_status_line(writer, &truncate(&status, total_cols as usize))?;
        }
        renderer.end_sync_update()?;
        Ok(())
    }

    fn draw_results<W: Write>(
        &mut self,
        renderer: &mut KittyRenderer<W>,
        workbench: &Workbench,
        column: u16,
        width: usize,
        rows: u16,
    ) -> Result<()> {
        if width < 8 {
            return Ok(());
        }
        let results = newest_first(workbench.insights());
        let focused = results
            .iter()
            .find(|row| Some(row.id) == self.focus)
            .or_else(|| results.first());
        let preview = focused.and_then(|row| row.image);
        let text_rows = if preview.is_some() { rows / 2 } else { rows };

        let mut line = 0u16;
        {
            let writer = renderer.writer();
            for row in 0..rows {
                crossterm::queue!(
                    writer,
                    cursor::MoveTo(column, row),
                    Clear(ClearType::UntilNewLine)
                )?;
            }
            if results.is_empty() {
                crossterm::queue!(
                    writer,
                    cursor::MoveTo(column, 0),
                    Print(truncate("No insights yet. Select a region, then e/s/c/i.", width))
                )?;
            }
            for row in &results {
                if line >= text_rows {
                    break;
                }
                let is_focused = focused.map(|f| f.id) == Some(row.id);
                let marker = if is_focused { "▶ " } else { "  " };
                crossterm::queue!(
                    writer,
                    cursor::MoveTo(column, line),
                    SetAttribute(Attribute::Bold),
                    Print(truncate(&format!("{marker}{}", row.heading()), width)),
                    SetAttribute(Attribute::Reset)
                )?;
                line += 1;

                let budget = if is_focused { usize::MAX } else { 2 };
                for text in body_lines(row, width.saturating_sub(2), budget) {
                    if line >= text_rows {
                        break;
                    }
                    crossterm::queue!(writer, cursor::MoveTo(column + 2, line), Print(text))?;
                    line += 1;
                }
            }
        }

        let preview_frame = focused.filter(|row| row.image.is_some()).map(|row| PreviewFrame {
            id: row.id,
            column,
            row: text_rows,
            columns: width as u16,
            rows: rows.saturating_sub(text_rows),
        });
        if preview_frame != self.drawn_preview && self.drawn_preview.take().is_some() {
            renderer.delete_image(PREVIEW_IMAGE_ID)?;
        }

        if let (Some(image), Some(frame)) = (preview, preview_frame) {
            let drawn = self.drawn_preview == Some(frame)
                || renderer.draw_encoded(
                    image,
                    DrawParams::at(
                        PREVIEW_IMAGE_ID,
                        frame.column,
                        frame.row,
                        frame.columns as u32,
                        frame.rows as u32,
                    ),
                )?;
            if drawn {
                self.drawn_preview = Some(frame);
            } else {
                let writer = renderer.writer();
                crossterm::queue!(
                    writer,
                    cursor::MoveTo(column, text_rows),
                    Print(truncate(
                        &format!("[{} image, export with w]", image.mime_type),
                        width
                    ))
                )?;
            }
        }
        Ok(())
    }
}

fn body_lines(row: &ResultRow<'_>, width: usize, budget: usize) -> Vec<String> {
    match row.status {
        ResultStatus::Generating => vec!["…".to_owned()],
        _ if row.image.is_some() => vec!["[image]".to_owned()],
        _ => wrap_lines(row.body, width, budget),
    }
}

fn read_document(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {:?}", path))
}

fn cell_size(columns: u16, rows: u16) -> (f32, f32) {
    match terminal::window_size() {
        Ok(size) if size.width > 0 && size.height > 0 && columns > 0 && rows > 0 => (
            size.width as f32 / columns as f32,
            size.height as f32 / rows as f32,
        ),
        _ => (0.0, 0.0),
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Hard-wraps `text` at `width` characters, at most `max_lines` lines.
fn wrap_lines(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for source in text.lines() {
        let chars: Vec<char> = source.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
        if lines.len() >= max_lines {
            lines.truncate(max_lines);
            break;
        }
    }
    lines
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdfinsight.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the UI, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

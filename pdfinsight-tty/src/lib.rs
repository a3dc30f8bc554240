use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind},
    terminal::{Clear, ClearType},
};
use pdfinsight_core::{encode_png, ArtifactKind, BoundingBox, EncodedImage, RenderImage, SurfacePoint};

pub const PAGE_IMAGE_ID: u32 = 1;
pub const PREVIEW_IMAGE_ID: u32 = 2;

const SELECTION_COLOR: [u8; 4] = [59, 130, 246, 255];

pub struct KittyRenderer<W: Write> {
    writer: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub image_id: u32,
    pub column: u16,
    pub row: u16,
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn at(image_id: u32, column: u16, row: u16, columns: u32, rows: u32) -> Self {
        Self {
            image_id,
            column,
            row,
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        let encoded = encode_png(image)?;
        self.draw_png(&encoded.bytes, image.width, image.height, params)
    }

    /// Draws an already encoded image. Only PNG is understood by the protocol;
    /// returns `false` for anything else.
    pub fn draw_encoded(&mut self, image: &EncodedImage, params: DrawParams) -> Result<bool> {
        if image.mime_type != "image/png" {
            return Ok(false);
        }
        self.draw_png(&image.bytes, 0, 0, params)?;
        Ok(true)
    }

    fn draw_png(&mut self, png: &[u8], width: u32, height: u32, params: DrawParams) -> Result<()> {
        crossterm::queue!(&mut self.writer, cursor::MoveTo(params.column, params.row))?;

        let encoded = BASE64.encode(png);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p=1,c={},r={}",
                    params.image_id, params.columns, params.rows,
                )?;
                if width > 0 && height > 0 {
                    write!(self.writer, ",s={},v={}", width, height)?;
                }
                write!(self.writer, ",z=-1,m={}", if more { 1 } else { 0 })?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every placement of `image_id` and frees its data.
    pub fn delete_image(&mut self, image_id: u32) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=I,i={},q=2\u{1b}\\", image_id)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Where a page image sits on screen and how cells map back to surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageViewport {
    pub column: u16,
    pub row: u16,
    pub columns: u16,
    pub rows: u16,
    pub surface_width: u32,
    pub surface_height: u32,
}

impl PageViewport {
    /// Fits a `surface_width` x `surface_height` image into the available cells
    /// keeping its aspect ratio. `cell_width`/`cell_height` are pixel sizes of
    /// one cell; when unknown (0) a 1:2 cell is assumed.
    pub fn fit(
        column: u16,
        row: u16,
        available_columns: u16,
        available_rows: u16,
        surface_width: u32,
        surface_height: u32,
        cell_width: f32,
        cell_height: f32,
    ) -> Self {
        let available_columns = available_columns.max(1);
        let available_rows = available_rows.max(1);
        let (cell_width, cell_height) = if cell_width > 0.0 && cell_height > 0.0 {
            (cell_width, cell_height)
        } else {
            (1.0, 2.0)
        };

        let mut columns = available_columns;
        let mut rows = available_rows;
        if surface_width > 0 && surface_height > 0 {
            let image_ratio = surface_width as f32 / surface_height as f32;
            let area_width = available_columns as f32 * cell_width;
            let area_height = available_rows as f32 * cell_height;
            if area_width / area_height > image_ratio {
                let width_px = area_height * image_ratio;
                columns = ((width_px / cell_width).round() as u16).clamp(1, available_columns);
            } else {
                let height_px = area_width / image_ratio;
                rows = ((height_px / cell_height).round() as u16).clamp(1, available_rows);
            }
        }

        Self {
            column,
            row,
            columns,
            rows,
            surface_width,
            surface_height,
        }
    }

    pub fn contains(&self, column: u16, row: u16) -> bool {
        column >= self.column
            && row >= self.row
            && column < self.column.saturating_add(self.columns)
            && row < self.row.saturating_add(self.rows)
    }

    /// Surface position under the centre of a cell. Cells outside the
    /// viewport are clamped to its edge.
    pub fn to_surface(&self, column: u16, row: u16) -> SurfacePoint {
        let rel_col = column.saturating_sub(self.column).min(self.columns) as f32 + 0.5;
        let rel_row = row.saturating_sub(self.row).min(self.rows) as f32 + 0.5;
        let x = rel_col / self.columns.max(1) as f32 * self.surface_width as f32;
        let y = rel_row / self.rows.max(1) as f32 * self.surface_height as f32;
        SurfacePoint::new(
            x.min(self.surface_width as f32),
            y.min(self.surface_height as f32),
        )
    }

    pub fn translate(&self, kind: PointerKind, column: u16, row: u16) -> Option<PointerAction> {
        let inside = self.contains(column, row);
        match kind {
            PointerKind::Down if inside => Some(PointerAction::Down(self.to_surface(column, row))),
            PointerKind::Down => None,
            PointerKind::Drag if inside => Some(PointerAction::Move(self.to_surface(column, row))),
            PointerKind::Up if inside => Some(PointerAction::Up(self.to_surface(column, row))),
            PointerKind::Drag | PointerKind::Up => Some(PointerAction::Leave),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Down,
    Drag,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerAction {
    Down(SurfacePoint),
    Move(SurfacePoint),
    /// Release at a point; callers move there first, then finalize.
    Up(SurfacePoint),
    Leave,
}

/// Copy of `image` with a selection outline drawn over it.
pub fn paint_selection(image: &RenderImage, rect: BoundingBox) -> RenderImage {
    let mut out = image.clone();
    let Some(px) = rect.to_pixel_rect(image.width, image.height) else {
        return out;
    };
    let thickness = (image.width.max(image.height) / 400).max(2);
    let x1 = px.x + px.width;
    let y1 = px.y + px.height;

    for y in px.y..y1 {
        for x in px.x..x1 {
            let on_edge = x < px.x + thickness
                || x + thickness >= x1
                || y < px.y + thickness
                || y + thickness >= y1;
            if on_edge {
                let offset = (y as usize * image.width as usize + x as usize) * 4;
                out.pixels[offset..offset + 4].copy_from_slice(&SELECTION_COLOR);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Pointer { kind: PointerKind, column: u16, row: u16 },
    NextPage { count: usize },
    PrevPage { count: usize },
    ZoomIn,
    ZoomOut,
    ResetZoom,
    Request(ArtifactKind),
    FocusNext,
    FocusPrev,
    RemoveFocused,
    ExportFocused,
    CancelSelection,
    NextDocument,
    Resize,
    Quit,
    None,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(key) => self.map_key(key),
            Event::Mouse(mouse) => self.map_mouse(mouse),
            Event::Resize(_, _) => UiEvent::Resize,
            _ => UiEvent::None,
        }
    }

    fn map_mouse(&mut self, event: MouseEvent) -> UiEvent {
        let kind = match event.kind {
            MouseEventKind::Down(MouseButton::Left) => PointerKind::Down,
            MouseEventKind::Drag(MouseButton::Left) => PointerKind::Drag,
            MouseEventKind::Up(MouseButton::Left) => PointerKind::Up,
            _ => return UiEvent::None,
        };
        self.reset_count();
        UiEvent::Pointer {
            kind,
            column: event.column,
            row: event.row,
        }
    }

    fn map_key(&mut self, event: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = event;
        match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                UiEvent::None
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Down, KeyModifiers::NONE)
            | (KeyCode::PageDown, _) => {
                let count = self.take_count();
                UiEvent::NextPage { count }
            }
            (KeyCode::Char('k'), KeyModifiers::NONE)
            | (KeyCode::Up, KeyModifiers::NONE)
            | (KeyCode::PageUp, _) => {
                let count = self.take_count();
                UiEvent::PrevPage { count }
            }
            (KeyCode::Char('c'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
                self.reset_count();
                UiEvent::Quit
            }
            _ => {
                self.reset_count();
                Self::map_command(code, modifiers)
            }
        }
    }

    fn map_command(code: KeyCode, modifiers: KeyModifiers) -> UiEvent {
        match (code, modifiers) {
            (KeyCode::Char('+'), _) => UiEvent::ZoomIn,
            (KeyCode::Char('-'), _) => UiEvent::ZoomOut,
            (KeyCode::Char('='), _) => UiEvent::ResetZoom,
            (KeyCode::Char('e'), KeyModifiers::NONE) => UiEvent::Request(ArtifactKind::Explanation),
            (KeyCode::Char('s'), KeyModifiers::NONE) => UiEvent::Request(ArtifactKind::Slide),
            (KeyCode::Char('c'), KeyModifiers::NONE) => UiEvent::Request(ArtifactKind::Code),
            (KeyCode::Char('i'), KeyModifiers::NONE) => UiEvent::Request(ArtifactKind::Infographic),
            (KeyCode::Tab, KeyModifiers::NONE) => UiEvent::FocusNext,
            (KeyCode::BackTab, _) => UiEvent::FocusPrev,
            (KeyCode::Char('x'), KeyModifiers::NONE) | (KeyCode::Delete, _) => {
                UiEvent::RemoveFocused
            }
            (KeyCode::Char('w'), KeyModifiers::NONE) => UiEvent::ExportFocused,
            (KeyCode::Esc, _) => UiEvent::CancelSelection,
            (KeyCode::Char(']'), _) => UiEvent::NextDocument,
            (KeyCode::Char('q'), _) => UiEvent::Quit,
            _ => UiEvent::None,
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

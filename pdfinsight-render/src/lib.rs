use std::env;
use std::mem;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::RgbaImage;
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdfinsight_core::{
    DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider, RenderImage, RenderRequest,
};
use tracing::{debug, instrument, warn};

pub const PDFIUM_LIBRARY_ENV: &str = "PDFINSIGHT_PDFIUM_LIBRARY_PATH";

const MIN_SCALE: f32 = 0.1;

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn open_bytes(&self, bytes: Vec<u8>) -> Result<Arc<dyn DocumentBackend>> {
        check_pdf_header(&bytes)?;
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|err| anyhow!("failed to parse PDF: {err}"))?;
        let info = build_document_info(&document);
        debug!(pages = info.page_count, "pdf parsed");

        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It
        // is stored in PdfiumDocument::document, which is declared before the
        // Arc<Pdfium> clone and therefore dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Arc::new(PdfiumDocument {
            document: Mutex::new(document),
            info,
            _pdfium: Arc::clone(&self.pdfium),
        }))
    }
}

struct PdfiumDocument {
    document: Mutex<PdfDocument<'static>>,
    info: DocumentInfo,
    _pdfium: Arc<Pdfium>,
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        if request.page_index >= self.info.page_count {
            bail!("page {} out of range", request.page_index);
        }
        let page_index: PdfPageIndex = request
            .page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", request.page_index))?;

        let document = self.document.lock();
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(MIN_SCALE));
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        Ok(into_render_image(bitmap.as_image().to_rgba8()))
    }
}

fn build_document_info(document: &PdfDocument<'_>) -> DocumentInfo {
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned())
        .filter(|t| !t.trim().is_empty());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned())
        .filter(|t| !t.trim().is_empty());

    DocumentInfo {
        page_count,
        metadata: DocumentMetadata { title, author },
    }
}

fn into_render_image(image: RgbaImage) -> RenderImage {
    let (width, height) = image.dimensions();
    RenderImage {
        width,
        height,
        pixels: image.into_raw(),
    }
}

/// Rejects payloads that are obviously not PDFs before handing them to pdfium.
fn check_pdf_header(bytes: &[u8]) -> Result<()> {
    // Some producers put junk before the header; pdfium tolerates up to 1KiB.
    let window = &bytes[..bytes.len().min(1024)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        Ok(())
    } else {
        Err(anyhow!("payload is not a PDF document"))
    }
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = env::var_os(PDFIUM_LIBRARY_ENV).map(PathBuf::from)?;
    if path.as_os_str().is_empty() {
        return None;
    }
    match Pdfium::bind_to_library(&path) {
        Ok(bindings) => Some(Pdfium::new(bindings)),
        Err(err) => {
            warn!(
                "failed to load Pdfium from {} ({}): {}",
                path.display(),
                PDFIUM_LIBRARY_ENV,
                err
            );
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}

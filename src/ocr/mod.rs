//! Text recognition over documents and images.
//!
//! A document is rendered page by page into images, and each image goes
//! through the recognition engine. Both steps sit behind traits so the
//! external tools can be swapped or faked.

pub mod cli;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::RecognitionError;

pub use cli::{PdftoppmRenderer, TesseractRecognizer};

/// Renders document pages to images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, document: &Path) -> Result<usize, RecognitionError>;

    /// Render one page (1-based) to PNG bytes.
    async fn render_page(&self, document: &Path, page: usize) -> Result<Vec<u8>, RecognitionError>;
}

/// Turns a rendered image into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize `image`. `page` is used for error reporting only.
    async fn recognize(&self, image: &[u8], page: usize) -> Result<String, RecognitionError>;
}

/// Renderer plus recognizer, producing one text blob per document.
#[derive(Clone)]
pub struct DocumentRecognizer {
    renderer: Arc<dyn PageRenderer>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl DocumentRecognizer {
    pub fn new(renderer: Arc<dyn PageRenderer>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            renderer,
            recognizer,
        }
    }

    /// Recognize every page in order. Each page's text is followed by `\n`.
    ///
    /// All-or-nothing: the first page that fails aborts the whole document.
    pub async fn recognize_document(&self, document: &Path) -> Result<String, RecognitionError> {
        let pages = self.renderer.page_count(document).await?;
        info!(document = %document.display(), pages, "Recognizing document");

        let mut text = String::new();
        for page in 1..=pages {
            let image = self.renderer.render_page(document, page).await?;
            let page_text = self.recognizer.recognize(&image, page).await?;
            debug!(page, chars = page_text.len(), "Recognized page");
            text.push_str(&page_text);
            text.push('\n');
        }
        Ok(text)
    }

    /// Recognize a single image.
    pub async fn recognize_image(&self, image: &[u8]) -> Result<String, RecognitionError> {
        self.recognizer.recognize(image, 1).await
    }
}

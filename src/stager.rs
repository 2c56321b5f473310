use crate::error::{Result, SubmissionError};
use crate::models::{Preview, StagedFile};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::join_all;
use tracing::{debug, warn};

/// Maximum number of photos a listing may carry
pub const MAX_IMAGES: usize = 5;

/// Client-side holding area for images picked but not yet submitted
#[derive(Debug, Default)]
pub struct ImageStager {
    existing: usize,
    staged: Vec<StagedFile>,
}

impl ImageStager {
    /// Stager for a new listing
    pub fn new() -> Self {
        Self::default()
    }

    /// Stager for editing a listing that already has `existing` attachments
    pub fn for_existing(existing: usize) -> Self {
        Self {
            existing,
            staged: Vec::new(),
        }
    }

    /// Update the persisted count, e.g. after the seller marks attachments for removal
    pub fn set_existing(&mut self, existing: usize) {
        self.existing = existing;
    }

    pub fn existing(&self) -> usize {
        self.existing
    }

    pub fn staged(&self) -> &[StagedFile] {
        &self.staged
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Free slots left under the cap
    pub fn remaining(&self) -> usize {
        MAX_IMAGES.saturating_sub(self.existing + self.staged.len())
    }

    /// Stage `files`, generating a preview for each.
    ///
    /// Rejects the whole batch without touching staged state when it would
    /// push the listing over [`MAX_IMAGES`].
    pub async fn stage(&mut self, files: Vec<StagedFile>) -> Result<()> {
        if self.existing + self.staged.len() + files.len() > MAX_IMAGES {
            warn!(
                existing = self.existing,
                staged = self.staged.len(),
                incoming = files.len(),
                "Rejecting images over capacity"
            );
            return Err(SubmissionError::Capacity { limit: MAX_IMAGES });
        }

        let previewed = join_all(files.into_iter().map(with_preview)).await;
        debug!("Staged {} image(s)", previewed.len());
        self.staged.extend(previewed);
        Ok(())
    }

    /// Remove a staged file together with its preview
    pub fn unstage(&mut self, index: usize) -> Option<StagedFile> {
        if index < self.staged.len() {
            Some(self.staged.remove(index))
        } else {
            None
        }
    }

    /// Hand all staged files over for submission, leaving the stager empty
    pub fn take(&mut self) -> Vec<StagedFile> {
        std::mem::take(&mut self.staged)
    }
}

async fn with_preview(mut file: StagedFile) -> StagedFile {
    let name = file.file_name.clone();
    let bytes = file.bytes.clone();
    match tokio::task::spawn_blocking(move || render_preview(&name, &bytes)).await {
        Ok(preview) => file.preview = Some(preview),
        Err(e) => warn!("Preview generation failed for {}: {}", file.file_name, e),
    }
    file
}

/// Encode the image as a data URL, the way a browser's file reader would
pub fn render_preview(file_name: &str, bytes: &[u8]) -> Preview {
    let mime = mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let data_url = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
    Preview { mime, data_url }
}

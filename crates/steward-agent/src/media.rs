//! Attachment pre-processing seam.
//!
//! Vision/OCR analysis is an external collaborator. The loop controller
//! only asks for a textual description of each attachment and folds it
//! into the context; analyzer failures are logged and skipped.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Attachment;

/// External collaborator that turns an attachment into a text description.
#[async_trait]
pub trait MediaAnalyzer: Send + Sync {
    /// Produce a textual description of the attachment.
    async fn describe(&self, attachment: &Attachment) -> Result<String>;
}

/// Placeholder analyzer that names the attachment without inspecting it.
#[derive(Debug, Default)]
pub struct NoopMediaAnalyzer;

#[async_trait]
impl MediaAnalyzer for NoopMediaAnalyzer {
    async fn describe(&self, attachment: &Attachment) -> Result<String> {
        Ok(format!(
            "Attachment '{}' ({}) was provided but not analyzed.",
            attachment.name, attachment.media_type
        ))
    }
}

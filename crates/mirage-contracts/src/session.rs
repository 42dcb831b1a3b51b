use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

use crate::requests::GenerationResult;

/// Display caps for the interactive surface; the store itself keeps every
/// entry for the lifetime of the session.
pub const IMAGE_GALLERY_LIMIT: usize = 8;
pub const VIDEO_GALLERY_LIMIT: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub id: String,
    pub created_at: String,
    pub result: GenerationResult,
}

/// Most-recent-first history of generated artifacts. Entries are never
/// mutated after insertion; the gallery dies with the session.
#[derive(Debug, Default)]
pub struct SessionGallery {
    entries: Vec<GalleryEntry>,
}

impl SessionGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, result: GenerationResult) -> &GalleryEntry {
        let entry = GalleryEntry {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            result,
        };
        self.entries.insert(0, entry);
        &self.entries[0]
    }

    pub fn recent(&self, n: usize) -> &[GalleryEntry] {
        &self.entries[..n.min(self.entries.len())]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn latest(&self) -> Option<&GalleryEntry> {
        self.entries.first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::models::MediaKind;
    use crate::requests::{ArtifactPayload, GenerationResult, MediaBytes};

    use super::SessionGallery;

    fn result(tag: &str) -> GenerationResult {
        GenerationResult {
            kind: MediaKind::Image,
            artifact: ArtifactPayload::Placeholder(MediaBytes::new(
                tag.as_bytes().to_vec(),
                "image/png",
            )),
            model: "test/model".to_string(),
            status: tag.to_string(),
        }
    }

    #[test]
    fn append_inserts_most_recent_first() {
        let mut gallery = SessionGallery::new();
        gallery.append(result("a"));
        gallery.append(result("b"));

        let recent = gallery.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].result.status, "b");
        assert_eq!(recent[1].result.status, "a");
    }

    #[test]
    fn recent_never_returns_more_than_requested() {
        let mut gallery = SessionGallery::new();
        for idx in 0..12 {
            gallery.append(result(&format!("r{idx}")));
        }
        assert_eq!(gallery.recent(8).len(), 8);
        assert_eq!(gallery.recent(100).len(), 12);
        assert_eq!(gallery.len(), 12);
    }

    #[test]
    fn recent_does_not_mutate_the_store() {
        let mut gallery = SessionGallery::new();
        gallery.append(result("a"));
        let before: Vec<String> = gallery.recent(8).iter().map(|e| e.id.clone()).collect();
        let _ = gallery.recent(1);
        let after: Vec<String> = gallery.recent(8).iter().map(|e| e.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn clear_empties_the_store() {
        let mut gallery = SessionGallery::new();
        gallery.append(result("a"));
        gallery.clear();
        assert!(gallery.is_empty());
        assert!(gallery.recent(4).is_empty());
        assert!(gallery.latest().is_none());
    }

    #[test]
    fn latest_tracks_the_newest_entry() {
        let mut gallery = SessionGallery::new();
        gallery.append(result("a"));
        gallery.append(result("b"));
        assert_eq!(gallery.latest().unwrap().result.status, "b");
    }
}

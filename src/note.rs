use crate::batch::NoteRow;

// Only the last captured line survives.
#[derive(Debug, Clone)]
pub struct NoteExtractor {
    chunk_size: usize,
    text: Option<String>,
    captured: usize,
}

impl NoteExtractor {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            text: None,
            captured: 0,
        }
    }

    pub fn capture(&mut self, line_number: usize, text: &str) {
        if self.text.is_some() {
            tracing::debug!(line_number, "replacing previously captured note text");
        }
        self.text = Some(text.to_string());
        self.captured += 1;
    }

    pub fn has_note(&self) -> bool {
        self.text.as_deref().is_some_and(|text| !text.is_empty())
    }

    pub fn captured_lines(&self) -> usize {
        self.captured
    }

    pub fn finish(&self, reference_key: i64, load_date: &str) -> Vec<NoteRow> {
        let Some(text) = self.text.as_deref() else {
            return Vec::new();
        };
        chunk_text(text, self.chunk_size)
            .into_iter()
            .zip(1..)
            .map(|(chunk, sequence)| NoteRow {
                reference_key,
                sequence,
                text: chunk,
                created: load_date.to_string(),
                modified: load_date.to_string(),
            })
            .collect()
    }
}

pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_note_splits_at_boundary() {
        let mut notes = NoteExtractor::new(255);
        notes.capture(12, &"n".repeat(600));
        let rows = notes.finish(77, "10/19/2026");
        let sizes = rows.iter().map(|row| row.text.len()).collect::<Vec<_>>();
        let sequences = rows.iter().map(|row| row.sequence).collect::<Vec<_>>();
        assert_eq!(sizes, vec![255, 255, 90]);
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(rows.iter().all(|row| row.reference_key == 77));
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        assert_eq!(chunk_text(&"a".repeat(510), 255).len(), 2);
        assert!(chunk_text("", 255).is_empty());
    }

    #[test]
    fn last_captured_line_wins() {
        let mut notes = NoteExtractor::new(255);
        notes.capture(3, "stray line");
        notes.capture(9, "the real note");
        let rows = notes.finish(1, "d");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "the real note");
        assert_eq!(notes.captured_lines(), 2);
    }

    #[test]
    fn no_note_no_rows() {
        let notes = NoteExtractor::new(255);
        assert!(!notes.has_note());
        assert!(notes.finish(1, "d").is_empty());
    }

    #[test]
    fn chunks_count_characters_not_bytes() {
        let chunks = chunk_text("αβγδε", 2);
        assert_eq!(chunks, vec!["αβ", "γδ", "ε"]);
    }
}

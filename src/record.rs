pub const FULL_ARITY: usize = 8;
pub const SHORT_ARITY: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLayout {
    PerLine,
    PerRun {
        reference: String,
        created_by: String,
    },
}

impl RecordLayout {
    pub fn arity(&self) -> usize {
        match self {
            RecordLayout::PerLine => FULL_ARITY,
            RecordLayout::PerRun { .. } => SHORT_ARITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub marker_id: String,
    pub chromosome: String,
    pub update_chromosome: bool,
    pub band: Option<String>,
    pub assay: String,
    pub description: String,
    pub reference: String,
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Record(InputRecord),
    Note(String),
    Blank,
}

pub fn parse_line(line: &str, delimiter: char, layout: &RecordLayout) -> ParsedLine {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.trim().is_empty() {
        return ParsedLine::Blank;
    }

    let fields = line.split(delimiter).map(str::trim).collect::<Vec<_>>();
    if fields.len() < layout.arity() {
        return ParsedLine::Note(line.to_string());
    }

    let (reference, created_by) = match layout {
        RecordLayout::PerLine => (fields[6].to_string(), fields[7].to_string()),
        RecordLayout::PerRun {
            reference,
            created_by,
        } => (reference.clone(), created_by.clone()),
    };

    ParsedLine::Record(InputRecord {
        marker_id: fields[0].to_string(),
        chromosome: fields[1].to_string(),
        update_chromosome: fields[2] == "yes",
        band: Some(fields[3]).filter(|band| !band.is_empty()).map(str::to_string),
        assay: fields[4].to_string(),
        description: fields[5].to_string(),
        reference,
        created_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_layout_record() {
        let parsed = parse_line(
            "MGI:1234|4|yes|12.5|sequence analysis|desc|J:9999|jdoe\n",
            '|',
            &RecordLayout::PerLine,
        );
        let ParsedLine::Record(record) = parsed else {
            panic!("expected record, got {parsed:?}");
        };
        assert_eq!(record.marker_id, "MGI:1234");
        assert_eq!(record.chromosome, "4");
        assert!(record.update_chromosome);
        assert_eq!(record.band.as_deref(), Some("12.5"));
        assert_eq!(record.assay, "sequence analysis");
        assert_eq!(record.reference, "J:9999");
        assert_eq!(record.created_by, "jdoe");
    }

    #[test]
    fn short_line_is_note_text() {
        let parsed = parse_line(
            "These markers were mapped by FISH.\r\n",
            '|',
            &RecordLayout::PerLine,
        );
        assert_eq!(
            parsed,
            ParsedLine::Note("These markers were mapped by FISH.".to_string())
        );
    }

    #[test]
    fn per_run_layout_fills_identity() {
        let layout = RecordLayout::PerRun {
            reference: "J:1".to_string(),
            created_by: "curator".to_string(),
        };
        let ParsedLine::Record(record) =
            parse_line("MGI:1\tX\tno\t\tlinkage\t", '\t', &layout)
        else {
            panic!("expected record");
        };
        assert!(!record.update_chromosome);
        assert_eq!(record.band, None);
        assert_eq!(record.reference, "J:1");
        assert_eq!(record.created_by, "curator");
    }

    #[test]
    fn update_flag_is_exact_lowercase_yes() {
        for flag in ["YES", "Yes", "y", "no"] {
            let line = format!("MGI:1|X|{flag}||FISH|d|J:1|u");
            let ParsedLine::Record(record) = parse_line(&line, '|', &RecordLayout::PerLine) else {
                panic!("expected record for {flag}");
            };
            assert!(!record.update_chromosome, "{flag} must not set the flag");
        }
    }

    #[test]
    fn blank_lines() {
        assert_eq!(parse_line("  \n", '|', &RecordLayout::PerLine), ParsedLine::Blank);
    }
}

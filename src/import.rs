use crate::schedule::{self, TimeWindow};

const EXPECTED_HEADER: [&str; 9] = [
    "student_no",
    "event_type",
    "event_title",
    "location",
    "start_time",
    "end_time",
    "responsible_party",
    "point_of_contact",
    "notes",
];

/// One accepted row of an assignment import. Import sources supply exact
/// bounds, so the window always comes from a (start, end) pair.
pub struct ImportRow {
    pub line_no: usize,
    pub student_no: String,
    pub event_type: String,
    pub event_title: String,
    pub location: String,
    pub window: TimeWindow,
    pub responsible_party: String,
    pub point_of_contact: Option<String>,
    pub notes: Option<String>,
}

pub struct RowError {
    pub line_no: usize,
    pub message: String,
}

pub struct ParsedImport {
    pub rows: Vec<ImportRow>,
    pub errors: Vec<RowError>,
}

/// Parse the CSV payload of `assignments.import`. A malformed header fails
/// the whole call; malformed rows are collected per line so the caller can
/// report them without aborting the batch.
pub fn parse_assignment_csv(text: &str) -> anyhow::Result<ParsedImport> {
    let mut lines = text.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, raw)) if raw.trim().is_empty() => continue,
            Some((_, raw)) => break raw,
            None => anyhow::bail!("empty import payload"),
        }
    };
    let header_cols: Vec<String> = split_csv_line(header)
        .iter()
        .map(|c| c.trim().to_ascii_lowercase())
        .collect();
    if header_cols != EXPECTED_HEADER {
        anyhow::bail!("unexpected header; expected {}", EXPECTED_HEADER.join(","));
    }

    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (idx, raw) in lines {
        let line_no = idx + 1;
        if raw.trim().is_empty() {
            continue;
        }
        match parse_row(line_no, raw) {
            Ok(row) => rows.push(row),
            Err(message) => errors.push(RowError { line_no, message }),
        }
    }

    Ok(ParsedImport { rows, errors })
}

fn parse_row(line_no: usize, raw: &str) -> Result<ImportRow, String> {
    let cols = split_csv_line(raw);
    if cols.len() != EXPECTED_HEADER.len() {
        return Err(format!(
            "expected {} fields, found {}",
            EXPECTED_HEADER.len(),
            cols.len()
        ));
    }

    let required = |i: usize| -> Result<String, String> {
        let v = cols[i].trim();
        if v.is_empty() {
            Err(format!("{} must not be empty", EXPECTED_HEADER[i]))
        } else {
            Ok(v.to_string())
        }
    };
    let optional = |i: usize| -> Option<String> {
        let v = cols[i].trim();
        if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        }
    };

    let student_no = required(0)?;
    let event_type = required(1)?;
    if !schedule::is_event_type(&event_type) {
        return Err(format!("unknown event_type: {}", event_type));
    }
    let event_title = required(2)?;
    let location = required(3)?;
    let start = schedule::parse_instant(&required(4)?).map_err(|e| e.to_string())?;
    let end = schedule::parse_instant(&required(5)?).map_err(|e| e.to_string())?;
    let window =
        schedule::resolve_time_window(Some(start), Some(end), None).map_err(|e| e.to_string())?;
    let responsible_party = required(6)?;

    Ok(ImportRow {
        line_no,
        student_no,
        event_type,
        event_title,
        location,
        window,
        responsible_party,
        point_of_contact: optional(7),
        notes: optional(8),
    })
}

/// Minimal CSV field splitting: commas separate fields, double quotes wrap
/// fields containing commas, `""` inside a quoted field is a literal quote.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

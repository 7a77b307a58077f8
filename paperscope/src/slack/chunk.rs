use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Start of a line that opens a subject or paper section.
    static ref SECTION_START: Regex = Regex::new(r"(?m)^\*:(?:newspaper|page_facing_up):").unwrap();
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` right before every section heading. The pieces concatenate back to `text`.
pub fn split_sections(text: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut last = 0;
    for m in SECTION_START.find_iter(text) {
        if m.start() > last {
            sections.push(&text[last..m.start()]);
            last = m.start();
        }
    }
    if last < text.len() {
        sections.push(&text[last..]);
    }
    sections
}

/// Split a formatted message into segments of at most `max_len` characters.
///
/// Whole sections are packed greedily. A section that alone exceeds the limit
/// gets segments of its own, packed line by line, and a line that alone exceeds
/// it is cut at character boundaries. Concatenating the segments always gives
/// back `text`.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut packer = Packer::new(max_len);
    for section in split_sections(text) {
        if char_len(section) <= max_len {
            packer.push(section);
            continue;
        }
        packer.flush();
        for line in section.split_inclusive('\n') {
            if char_len(line) <= max_len {
                packer.push(line);
            } else {
                for piece in split_chars(line, max_len) {
                    packer.push(piece);
                }
            }
        }
        packer.flush();
    }
    packer.finish()
}

/// Cut `text` every `max_len` characters.
fn split_chars(text: &str, max_len: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == max_len {
            pieces.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedy buffer: append while the limit allows, otherwise flush and start over.
struct Packer {
    max_len: usize,
    current: String,
    current_len: usize,
    segments: Vec<String>,
}

impl Packer {
    fn new(max_len: usize) -> Self {
        Self {
            max_len,
            current: String::new(),
            current_len: 0,
            segments: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str) {
        let len = char_len(piece);
        if self.current_len + len > self.max_len {
            self.flush();
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    /// Close the current segment, if any.
    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.segments.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.segments
    }
}

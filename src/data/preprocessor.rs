// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Normalises a classification input before tokenisation.
//
// Dataset exports carry the usual debris: non-breaking spaces,
// zero-width characters, byte order marks, HTML line breaks and
// stray control characters. The classifier sees one flat
// sequence, so all whitespace (newlines included) is collapsed
// into single spaces.
//
// Cleaning steps (applied in order):
//   1. Replace "<br />" style line breaks with a space
//   2. Map Unicode whitespace variants and control chars to a space
//   3. Collapse runs of whitespace and trim the ends
//
// Reference: Rust Book §8 (Strings in Rust)

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Clean a raw text string for downstream tokenisation.
    pub fn clean(&self, text: &str) -> String {
        // ── Step 1: HTML line breaks (common in review datasets) ─────────────
        let text = text
            .replace("<br />", " ")
            .replace("<br/>", " ")
            .replace("<br>", " ");

        // ── Step 2 + 3: map odd characters, collapse whitespace ───────────────
        let mut out        = String::with_capacity(text.len());
        let mut last_space = true; // drops leading whitespace

        for c in text.chars() {
            let c = match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                c if c.is_control() => ' ',
                c => c,
            };
            if c.is_whitespace() {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(c);
                last_space = false;
            }
        }

        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

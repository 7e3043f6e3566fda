use unicode_normalization::UnicodeNormalization;

/// Unicode NFC normalization + BOM strip + CRLF -> LF + trim.
/// Teacher-entered text arrives from several locales (including Devanagari
/// script), so prompts are normalized before they reach the model.
pub fn clean_text(s: &str) -> String {
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') {
        // Byte Order Mark
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

pub fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

/// Normalize an inbound chat message before prompt assembly. Empty after
/// cleaning is a validation error for the caller to raise.
pub fn normalize_message(message: &str) -> String {
    clean_text(message)
}

//! Hebrew alphabet metadata: glyph names for the `post` table, the
//! descender-letter set used by the GlyphBuilder, and the fallback
//! character set injected from a system font.

/// The 22 base Hebrew letters plus their 5 final forms, mapped to the
/// ASCII glyph names used in the `post` table.
pub const HEBREW_LETTER_NAMES: &[(char, &str)] = &[
    ('א', "alef"),
    ('ב', "bet"),
    ('ג', "gimel"),
    ('ד', "dalet"),
    ('ה', "he"),
    ('ו', "vav"),
    ('ז', "zayin"),
    ('ח', "het"),
    ('ט', "tet"),
    ('י', "yod"),
    ('כ', "kaf"),
    ('ל', "lamed"),
    ('מ', "mem"),
    ('נ', "nun"),
    ('ס', "samekh"),
    ('ע', "ayin"),
    ('פ', "pe"),
    ('צ', "tzadi"),
    ('ק', "qof"),
    ('ר', "resh"),
    ('ש', "shin"),
    ('ת', "tav"),
    ('ך', "finalkaf"),
    ('ם', "finalmem"),
    ('ן', "finalnun"),
    ('ף', "finalpe"),
    ('ץ', "finaltsadi"),
];

/// Hebrew letters whose handwritten form extends below the baseline.
pub const DESCENDER_CHARS: &[char] = &['ף', 'ץ', 'ן', 'ק', 'ך'];

pub const DESCENDER_SHIFT: i32 = -200;

/// Characters auto-filled from a system fallback font when the user
/// hasn't assigned them: digits, common punctuation, brackets, math
/// symbols, and a handful of Hebrew punctuation marks.
pub const FALLBACK_CHARS: &str = concat!(
    "0123456789",
    "!?.,;:'\"",
    "()[]{}/<>",
    "+-=*@#$%^&~_|\\",
    '\u{05BE}', // maqaf
    '\u{05C0}', // paseq
    '\u{05C3}', // sof pasuq
    '\u{05F3}', // geresh
    '\u{05F4}', // gershayim
);

/// U+0590..=U+05FF, the Hebrew Unicode block.
pub fn is_hebrew_char(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}

pub fn is_descender(c: char) -> bool {
    DESCENDER_CHARS.contains(&c)
}

/// Glyph name for the `post` table: a known Hebrew name, or a
/// synthesized `uniXXXX` for everything else.
pub fn glyph_name(c: char) -> String {
    for (ch, name) in HEBREW_LETTER_NAMES {
        if *ch == c {
            return (*name).to_string();
        }
    }
    format!("uni{:04X}", c as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_letter_has_readable_name() {
        assert_eq!(glyph_name('א'), "alef");
        assert_eq!(glyph_name('ך'), "finalkaf");
    }

    #[test]
    fn unknown_char_gets_synthesized_name() {
        assert_eq!(glyph_name('A'), "uni0041");
    }

    #[test]
    fn descender_set_matches_spec() {
        for c in ['ף', 'ץ', 'ן', 'ק', 'ך'] {
            assert!(is_descender(c));
        }
        assert!(!is_descender('א'));
    }

    #[test]
    fn hebrew_block_boundaries() {
        assert!(is_hebrew_char('\u{0590}'));
        assert!(is_hebrew_char('\u{05FF}'));
        assert!(!is_hebrew_char('\u{058F}'));
        assert!(!is_hebrew_char('A'));
    }
}

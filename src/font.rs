//! The FontAssembler: turns a set of GlyphOutlines into a
//! conformant TTF byte stream via `write-fonts`, injecting `.notdef`
//! and `space` unconditionally and filling in everything the user
//! didn't draw from a system fallback font via `read-fonts`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use font_types::{Fixed, FWord, GlyphId, LongDateTime, Tag, UfWord, Version16Dot16};
use read_fonts::tables::glyf::CurvePoint as ReadCurvePoint;
use read_fonts::{FontRef, TableProvider};
use unicode_normalization::UnicodeNormalization;
use write_fonts::tables::cmap::Cmap;
use write_fonts::tables::glyf::{Bbox, Contour, Glyf, Glyph, GlyfLocaBuilder, Loca, SimpleGlyph};
use write_fonts::tables::head::{Flags, Head, MacStyle};
use write_fonts::tables::hhea::Hhea;
use write_fonts::tables::hmtx::{Hmtx, LongMetric};
use write_fonts::tables::loca::LocaFormat;
use write_fonts::tables::maxp::Maxp;
use write_fonts::tables::name::{Name, NameId};
use write_fonts::tables::os2::{Os2, SelectionFlags};
use write_fonts::tables::post::Post;
use write_fonts::FontBuilder;

use crate::error::AppError;
use crate::glyph::GlyphOutline;
use crate::hebrew;

pub const NOTDEF_ADVANCE: i32 = 500;
pub const NOTDEF_LSB: i32 = 50;
pub const SPACE_ADVANCE: i32 = 250;

#[derive(Debug, Clone, Default)]
pub struct FontMetadata {
    pub version: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
}

/// One glyph plus the codepoint it's mapped to, in glyph-order.
struct OrderedGlyph {
    codepoint: Option<u32>,
    outline: GlyphOutline,
}

/// Build a complete TTF in memory from the assigned GlyphOutlines.
/// `assignments` maps the assigned character to its outline; fallback
/// glyphs for unassigned common characters are injected from
/// `fallback_font_path` when one was found.
pub fn assemble_font(
    units_per_em: u16,
    font_name: &str,
    metadata: &FontMetadata,
    assignments: &BTreeMap<char, GlyphOutline>,
    fallback_font_path: Option<&Path>,
) -> Result<(Vec<u8>, usize), AppError> {
    let mut glyphs: Vec<OrderedGlyph> = Vec::new();

    glyphs.push(OrderedGlyph { codepoint: None, outline: notdef_glyph() });
    glyphs.push(OrderedGlyph { codepoint: Some(0x20), outline: space_glyph() });

    let mut assigned_codepoints: std::collections::HashSet<u32> = std::collections::HashSet::new();
    for (&ch, outline) in assignments {
        assigned_codepoints.insert(ch as u32);
        glyphs.push(OrderedGlyph { codepoint: Some(ch as u32), outline: outline.clone() });
    }

    if let Some(path) = fallback_font_path {
        match inject_fallback_glyphs(path, units_per_em, &assigned_codepoints) {
            Ok(fallback) => {
                tracing::info!(count = fallback.len(), "injected fallback glyphs");
                glyphs.extend(fallback);
            }
            Err(e) => {
                tracing::warn!(error = %e, "fallback font unusable, continuing without fallback glyphs");
            }
        }
    } else {
        tracing::warn!("no fallback font found on system, skipping glyph injection");
    }

    let glyph_count = glyphs.len();
    let bytes = build_ttf(units_per_em, font_name, metadata, glyphs)?;
    Ok((bytes, glyph_count))
}

fn notdef_glyph() -> GlyphOutline {
    use crate::geometry::FontPoint;
    use crate::glyph::GlyphContour;

    let points = vec![
        FontPoint::new(50, 0),
        FontPoint::new(450, 0),
        FontPoint::new(450, 700),
        FontPoint::new(50, 700),
    ];
    let on_curve = vec![true; 4];
    GlyphOutline {
        glyph_name: ".notdef".to_string(),
        contours: vec![GlyphContour { points, on_curve }],
        advance_width: NOTDEF_ADVANCE,
        left_side_bearing: NOTDEF_LSB,
    }
}

fn space_glyph() -> GlyphOutline {
    GlyphOutline {
        glyph_name: "space".to_string(),
        contours: vec![],
        advance_width: SPACE_ADVANCE,
        left_side_bearing: 0,
    }
}

fn build_ttf(
    units_per_em: u16,
    font_name: &str,
    metadata: &FontMetadata,
    glyphs: Vec<OrderedGlyph>,
) -> Result<Vec<u8>, AppError> {
    let mut glyf_builder = GlyfLocaBuilder::new();
    let mut x_min = i16::MAX;
    let mut y_min = i16::MAX;
    let mut x_max = i16::MIN;
    let mut y_max = i16::MIN;

    for g in &glyphs {
        let contours: Vec<Contour> = g
            .outline
            .contours
            .iter()
            .map(|c| {
                let pts: Vec<ReadCurvePoint> = c
                    .points
                    .iter()
                    .zip(c.on_curve.iter())
                    .map(|(p, &on)| {
                        x_min = x_min.min(p.x as i16);
                        x_max = x_max.max(p.x as i16);
                        y_min = y_min.min(p.y as i16);
                        y_max = y_max.max(p.y as i16);
                        ReadCurvePoint { x: p.x as i16, y: p.y as i16, on_curve: on }
                    })
                    .collect();
                Contour::from(pts)
            })
            .collect();

        let bbox = if contours.is_empty() {
            Bbox { x_min: 0, y_min: 0, x_max: 0, y_max: 0 }
        } else {
            let all_x = g.outline.contours.iter().flat_map(|c| c.points.iter().map(|p| p.x));
            let all_y = g.outline.contours.iter().flat_map(|c| c.points.iter().map(|p| p.y));
            Bbox {
                x_min: all_x.clone().min().unwrap_or(0) as i16,
                y_min: all_y.clone().min().unwrap_or(0) as i16,
                x_max: all_x.max().unwrap_or(0) as i16,
                y_max: all_y.max().unwrap_or(0) as i16,
            }
        };

        let simple = SimpleGlyph { bbox, contours, instructions: vec![] };
        glyf_builder
            .add_glyph(&Glyph::Simple(simple))
            .map_err(|e| AppError::AssemblyFailure(format!("glyf: {e}")))?;
    }

    if x_min > x_max {
        x_min = 0;
        x_max = 0;
    }
    if y_min > y_max {
        y_min = 0;
        y_max = 0;
    }

    let (glyf, loca, loca_format) = glyf_builder.build();

    let cmap_mappings: Vec<(char, GlyphId)> = glyphs
        .iter()
        .enumerate()
        .filter_map(|(gid, g)| {
            let cp = g.codepoint?;
            let ch = char::from_u32(cp)?;
            Some((ch, GlyphId::new(gid as u32)))
        })
        .collect();
    let cmap = Cmap::from_mappings(cmap_mappings)
        .map_err(|e| AppError::AssemblyFailure(format!("cmap: {e}")))?;

    let head = Head {
        font_revision: Fixed::from_f64(1.0),
        checksum_adjustment: 0,
        magic_number: 0x5F0F3CF5,
        flags: Flags::empty(),
        units_per_em,
        created: LongDateTime::new(0),
        modified: LongDateTime::new(0),
        x_min,
        y_min,
        x_max,
        y_max,
        mac_style: MacStyle::empty(),
        lowest_rec_ppem: 8,
        font_direction_hint: 2,
        index_to_loc_format: match loca_format {
            LocaFormat::Short => 0,
            LocaFormat::Long => 1,
        },
    };

    let advance_max = glyphs.iter().map(|g| g.outline.advance_width as u16).max().unwrap_or(0);
    let hhea = Hhea {
        ascender: FWord::new(800),
        descender: FWord::new(-200),
        line_gap: FWord::new(0),
        advance_width_max: UfWord::new(advance_max),
        min_left_side_bearing: FWord::new(x_min),
        min_right_side_bearing: FWord::new(0),
        x_max_extent: FWord::new(x_max),
        caret_slope_rise: 1,
        caret_slope_run: 0,
        caret_offset: 0,
        number_of_h_metrics: glyphs.len() as u16,
    };

    let hmtx = Hmtx {
        h_metrics: glyphs
            .iter()
            .map(|g| LongMetric {
                advance: g.outline.advance_width as u16,
                side_bearing: g.outline.left_side_bearing as i16,
            })
            .collect(),
        left_side_bearings: vec![],
    };

    let maxp = Maxp {
        num_glyphs: glyphs.len() as u16,
        max_points: Some(glyphs.iter().map(|g| g.outline.contours.iter().map(|c| c.points.len()).sum::<usize>()).max().unwrap_or(0) as u16),
        max_contours: Some(glyphs.iter().map(|g| g.outline.contours.len()).max().unwrap_or(0) as u16),
        max_composite_points: Some(0),
        max_composite_contours: Some(0),
        max_zones: Some(1),
        max_twilight_points: Some(0),
        max_storage: Some(0),
        max_function_defs: Some(0),
        max_instruction_defs: Some(0),
        max_stack_elements: Some(0),
        max_size_of_instructions: Some(0),
        max_component_elements: Some(0),
        max_component_depth: Some(0),
    };

    let os2 = Os2 {
        x_avg_char_width: (advance_max / 2) as i16,
        us_weight_class: 400,
        us_width_class: 5,
        fs_type: 0,
        y_subscript_x_size: 650,
        y_subscript_y_size: 600,
        y_subscript_x_offset: 0,
        y_subscript_y_offset: 75,
        y_superscript_x_size: 650,
        y_superscript_y_size: 600,
        y_superscript_x_offset: 0,
        y_superscript_y_offset: 350,
        y_strikeout_size: 50,
        y_strikeout_position: 300,
        s_family_class: 0,
        panose_10: [0; 10],
        ul_unicode_range_1: 0,
        ul_unicode_range_2: 0,
        ul_unicode_range_3: 0,
        ul_unicode_range_4: 0,
        ach_vend_id: Tag::new(b"NONE"),
        fs_selection: SelectionFlags::REGULAR,
        us_first_char_index: 0x20,
        us_last_char_index: 0x05FF,
        s_typo_ascender: 800,
        s_typo_descender: -200,
        s_typo_line_gap: 200,
        us_win_ascent: 1000,
        us_win_descent: 200,
        ul_code_page_range_1: Some(0),
        ul_code_page_range_2: Some(0),
        sx_height: Some(500),
        s_cap_height: Some(700),
        us_default_char: Some(0),
        us_break_char: Some(0x20),
        us_max_context: Some(0),
        us_lower_optical_point_size: None,
        us_upper_optical_point_size: None,
    };

    let post = Post {
        version: Version16Dot16::VERSION_2_0,
        italic_angle: Fixed::from_f64(0.0),
        underline_position: FWord::new(-100),
        underline_thickness: FWord::new(50),
        is_fixed_pitch: 0,
        min_mem_type42: 0,
        max_mem_type42: 0,
        min_mem_type1: 0,
        max_mem_type1: 0,
        num_glyphs: Some(glyphs.len() as u16),
        glyph_name_index: None,
        string_data: Some(glyphs.iter().map(|g| g.outline.glyph_name.clone().into()).collect()),
    };

    let name = build_name_table(font_name, metadata);

    let mut builder = FontBuilder::new();
    builder.add_table(&head).map_err(|e| AppError::AssemblyFailure(format!("head: {e}")))?;
    builder.add_table(&hhea).map_err(|e| AppError::AssemblyFailure(format!("hhea: {e}")))?;
    builder.add_table(&hmtx).map_err(|e| AppError::AssemblyFailure(format!("hmtx: {e}")))?;
    builder.add_table(&maxp).map_err(|e| AppError::AssemblyFailure(format!("maxp: {e}")))?;
    builder.add_table(&cmap).map_err(|e| AppError::AssemblyFailure(format!("cmap: {e}")))?;
    builder.add_table(&post).map_err(|e| AppError::AssemblyFailure(format!("post: {e}")))?;
    builder.add_table(&name).map_err(|e| AppError::AssemblyFailure(format!("name: {e}")))?;
    builder.add_table(&os2).map_err(|e| AppError::AssemblyFailure(format!("OS/2: {e}")))?;
    builder.add_table(&glyf).map_err(|e| AppError::AssemblyFailure(format!("glyf: {e}")))?;
    builder.add_table(&loca).map_err(|e| AppError::AssemblyFailure(format!("loca: {e}")))?;

    Ok(builder.build())
}

fn build_name_table(font_name: &str, metadata: &FontMetadata) -> Name {
    // PostScript names must be pure ASCII; normalize first so an accented
    // or composed-form font name degrades to its closest ASCII skeleton
    // instead of silently dropping to an empty string.
    let ps_name: String = font_name
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let ps_name = if ps_name.is_empty() { "Font".to_string() } else { ps_name };

    let mut names: Vec<(NameId, String)> = vec![
        (NameId::FAMILY_NAME, font_name.to_string()),
        (NameId::SUBFAMILY_NAME, "Regular".to_string()),
        (NameId::UNIQUE_ID, format!("{font_name}-Regular")),
        (NameId::FULL_NAME, format!("{font_name} Regular")),
        (NameId::POSTSCRIPT_NAME, ps_name),
    ];

    if let Some(v) = &metadata.version {
        names.push((NameId::VERSION_STRING, format!("Version {v}")));
    }
    if let Some(d) = &metadata.description {
        names.push((NameId::DESCRIPTION, d.clone()));
    }
    if let Some(l) = &metadata.license {
        names.push((NameId::LICENSE_DESCRIPTION, l.clone()));
    }
    if let Some(u) = &metadata.url {
        names.push((NameId::VENDOR_URL, u.clone()));
    }
    if let Some(a) = &metadata.author {
        names.push((NameId::MANUFACTURER, a.clone()));
        names.push((NameId::DESIGNER, a.clone()));
    }

    Name::new(names.into_iter().collect())
}

/// Search platform-appropriate font directories for the first
/// available fallback font, generalizing the original's
/// Windows-only path list.
pub fn find_fallback_font() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Windows\Fonts\arial.ttf",
            r"C:\Windows\Fonts\Arial.ttf",
            r"C:\Windows\Fonts\segoeui.ttf",
            r"C:\Windows\Fonts\tahoma.ttf",
            r"C:\Windows\Fonts\calibri.ttf",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/System/Library/Fonts/Helvetica.ttc",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "/Library/Fonts/Arial.ttf",
        ]
    } else {
        &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/noto/NotoSans-Regular.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
        ]
    };

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// Copy outlines for `hebrew::FALLBACK_CHARS` not already present in
/// `assigned` from the font at `fallback_font_path`, scaled to
/// `units_per_em`.
fn inject_fallback_glyphs(
    fallback_font_path: &Path,
    units_per_em: u16,
    assigned: &std::collections::HashSet<u32>,
) -> Result<Vec<OrderedGlyph>, AppError> {
    let data = std::fs::read(fallback_font_path)
        .map_err(|e| AppError::InternalFailure(format!("reading fallback font: {e}")))?;
    let font = FontRef::new(&data).map_err(|e| AppError::InternalFailure(format!("parsing fallback font: {e}")))?;

    let fallback_upem = font.head().map_err(|e| AppError::InternalFailure(e.to_string()))?.units_per_em();
    let scale = units_per_em as f64 / fallback_upem as f64;

    let cmap = font.cmap().map_err(|e| AppError::InternalFailure(e.to_string()))?;
    let glyf = font.glyf().map_err(|e| AppError::InternalFailure(e.to_string()))?;
    let loca = font.loca(None).map_err(|e| AppError::InternalFailure(e.to_string()))?;
    let hmtx = font.hmtx().map_err(|e| AppError::InternalFailure(e.to_string()))?;

    let mut out = Vec::new();

    for c in hebrew::FALLBACK_CHARS.chars() {
        let codepoint = c as u32;
        if assigned.contains(&codepoint) {
            continue;
        }
        let Some(gid) = cmap.map_codepoint(codepoint) else { continue };
        let Some(read_fonts::tables::glyf::Glyph::Simple(simple)) = loca.get_glyf(gid, &glyf).ok().flatten() else {
            continue;
        };

        use crate::geometry::FontPoint;
        use crate::glyph::GlyphContour;

        // The read-side `SimpleGlyph` has no per-contour iterator; it
        // exposes a flat point stream plus the end index of each
        // contour, so split `points()` on `end_pts_of_contours()`.
        let all_points: Vec<ReadCurvePoint> = simple.points().collect();
        let mut contours = Vec::new();
        let mut start = 0usize;
        for &end in simple.end_pts_of_contours() {
            let end = end.get() as usize;
            if end < start || end >= all_points.len() {
                break;
            }
            let slice = &all_points[start..=end];
            let points: Vec<FontPoint> = slice
                .iter()
                .map(|p| FontPoint::new((p.x as f64 * scale).round() as i32, (p.y as f64 * scale).round() as i32))
                .collect();
            let on_curve: Vec<bool> = slice.iter().map(|p| p.on_curve).collect();
            contours.push(GlyphContour { points, on_curve });
            start = end + 1;
        }

        if contours.is_empty() {
            continue;
        }

        let advance = hmtx.advance(gid).unwrap_or(0) as f64 * scale;
        let lsb = hmtx.side_bearing(gid).unwrap_or(0) as f64 * scale;

        out.push(OrderedGlyph {
            codepoint: Some(codepoint),
            outline: GlyphOutline {
                glyph_name: format!("uni{codepoint:04X}"),
                contours,
                advance_width: advance.round() as i32,
                left_side_bearing: lsb.round() as i32,
            },
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notdef_has_expected_rectangle() {
        let g = notdef_glyph();
        assert_eq!(g.advance_width, 500);
        assert_eq!(g.left_side_bearing, 50);
        assert_eq!(g.contours[0].points.len(), 4);
    }

    #[test]
    fn space_glyph_has_no_contours() {
        let g = space_glyph();
        assert!(g.contours.is_empty());
        assert_eq!(g.advance_width, 250);
    }

    #[test]
    fn assemble_font_with_no_fallback_still_produces_bytes() {
        let mut assignments = BTreeMap::new();
        assignments.insert('א', notdef_glyph());
        let (bytes, glyph_count) = assemble_font(1024, "TestFont", &FontMetadata::default(), &assignments, None).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(glyph_count, 3); // .notdef + space + 'א'
    }
}

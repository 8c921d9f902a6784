//! Static SVG export of the schematic with the user's element offsets.
//!
//! The document is streamed through a quick-xml reader and written back event
//! by event. Only start tags carrying an offset are rebuilt; everything else
//! is copied as read.

use super::editor::Vec2;
use crate::error::{AppError, Result};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const SCHEMATIC_SVG: &str = include_str!("../../assets/schematic.svg");

const ANIMATION_TAGS: [&[u8]; 4] = [b"animate", b"animateTransform", b"animateMotion", b"set"];

fn xml_error(e: impl std::fmt::Display) -> AppError {
    AppError::Diagram(format!("svg: {e}"))
}

fn is_animation(e: &BytesStart) -> bool {
    let name = e.local_name();
    ANIMATION_TAGS.contains(&name.as_ref())
}

fn fmt_coord(v: f64) -> String {
    let rounded = (v * 100.0).round() / 100.0;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        rounded.to_string()
    }
}

/// Offset registered for the element's id, if any
fn offset_for<'o>(
    e: &BytesStart,
    offsets: &'o BTreeMap<String, Vec2>,
) -> Result<Option<(&'o str, Vec2)>> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == b"id" {
            let id = std::str::from_utf8(&attr.value).map_err(xml_error)?;
            return Ok(offsets
                .get_key_value(id)
                .filter(|(_, o)| !o.is_zero())
                .map(|(k, o)| (k.as_str(), *o)));
        }
    }
    Ok(None)
}

/// Rebuilt tags are written with double quotes; a literal `"` from a
/// single-quoted value has to become an entity.
fn requoted(attr: Attribute<'_>) -> Attribute<'_> {
    if !attr.value.contains(&b'"') {
        return attr;
    }
    let mut value = Vec::with_capacity(attr.value.len() + 8);
    for &b in attr.value.iter() {
        if b == b'"' {
            value.extend_from_slice(b"&quot;");
        } else {
            value.push(b);
        }
    }
    Attribute {
        key: attr.key,
        value: Cow::Owned(value),
    }
}

/// Copy of the start tag with a translate prepended to its `transform`,
/// or a `transform` attribute appended when it has none.
fn with_translate(e: &BytesStart, offset: Vec2) -> Result<BytesStart<'static>> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(xml_error)?
        .to_string();
    let translate = format!("translate({} {})", fmt_coord(offset.x), fmt_coord(offset.y));

    let mut out = BytesStart::new(name);
    let mut extended = false;
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == b"transform" {
            let mut value = translate.clone().into_bytes();
            value.push(b' ');
            value.extend_from_slice(&attr.value);
            out.push_attribute(requoted(Attribute {
                key: attr.key,
                value: Cow::Owned(value),
            }));
            extended = true;
        } else {
            out.push_attribute(requoted(attr));
        }
    }
    if !extended {
        out.push_attribute(("transform", translate.as_str()));
    }
    Ok(out)
}

fn translated<'a>(
    e: BytesStart<'a>,
    offsets: &BTreeMap<String, Vec2>,
    placed: &mut BTreeSet<String>,
) -> Result<BytesStart<'a>> {
    match offset_for(&e, offsets)? {
        // ids are unique; only the first element with one is moved
        Some((id, offset)) if !placed.contains(id) => {
            placed.insert(id.to_string());
            with_translate(&e, offset)
        }
        _ => Ok(e),
    }
}

/// Static copy of `svg`: SMIL animation elements dropped with their content,
/// offsets baked in as transforms. Offsets for ids that are not in the
/// document are skipped.
pub fn export_svg(svg: &str, offsets: &BTreeMap<String, Vec2>) -> Result<String> {
    let mut reader = Reader::from_str(svg);
    let mut writer = Writer::new(Vec::with_capacity(svg.len()));
    let mut skip_depth = 0usize;
    let mut placed = BTreeSet::new();

    loop {
        let event = match reader.read_event().map_err(xml_error)? {
            Event::Eof => break,
            Event::Start(e) => {
                if skip_depth > 0 || is_animation(&e) {
                    skip_depth += 1;
                    continue;
                }
                Event::Start(translated(e, offsets, &mut placed)?)
            }
            Event::Empty(e) => {
                if skip_depth > 0 || is_animation(&e) {
                    continue;
                }
                Event::Empty(translated(e, offsets, &mut placed)?)
            }
            Event::End(_) if skip_depth > 0 => {
                skip_depth -= 1;
                continue;
            }
            _ if skip_depth > 0 => continue,
            other => other,
        };
        writer.write_event(event).map_err(xml_error)?;
    }

    for (id, _) in offsets
        .iter()
        .filter(|(id, o)| !o.is_zero() && !placed.contains(id.as_str()))
    {
        debug!(%id, "offset for unknown element skipped");
    }
    String::from_utf8(writer.into_inner()).map_err(xml_error)
}

/// Remove SMIL animation elements, both self-closing and with content
pub fn strip_animations(svg: &str) -> Result<String> {
    export_svg(svg, &BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::schematic::ELEMENTS;
    use pretty_assertions::assert_eq;

    fn offsets(id: &str, x: f64, y: f64) -> BTreeMap<String, Vec2> {
        let mut offsets = BTreeMap::new();
        offsets.insert(id.to_string(), Vec2::new(x, y));
        offsets
    }

    #[test]
    fn test_strip_animations() {
        let out = strip_animations(SCHEMATIC_SVG).unwrap();
        for tag in ["animate", "animateTransform", "animateMotion", "set"] {
            assert!(!out.contains(&format!("<{} ", tag)), "{} left in output", tag);
        }
        assert!(out.contains("<path d=\"M510,228 L534,240 L510,252 z\" fill=\"#333\">"));
        assert!(out.contains("</svg>"));
    }

    #[test]
    fn test_paired_animation_removed() {
        let svg = r#"<g><animate attributeName="x" dur="1s"></animate><rect id="a" x="1"/></g>"#;
        assert_eq!(strip_animations(svg).unwrap(), r#"<g><rect id="a" x="1"/></g>"#);
    }

    #[test]
    fn test_animation_subtree_removed() {
        let svg = r##"<g><animateMotion dur="2s"><mpath href="#p"/><set to="1"></set></animateMotion><circle r="3"/></g>"##;
        assert_eq!(strip_animations(svg).unwrap(), r#"<g><circle r="3"/></g>"#);
    }

    #[test]
    fn test_offsets_applied() {
        let mut offsets = offsets("heat_pump", 12.0, -4.5);
        offsets.insert("missing".to_string(), Vec2::new(1.0, 1.0));
        let out = export_svg(SCHEMATIC_SVG, &offsets).unwrap();
        assert!(out.contains(r#"<g id="heat_pump" class="unit" transform="translate(12 -4.5)">"#));
        assert_eq!(out.matches("translate(").count(), 1);
    }

    #[test]
    fn test_existing_transform_extended() {
        let svg = r#"<svg><g data-id="x" id="x" transform="scale(2)"></g></svg>"#;
        assert_eq!(
            export_svg(svg, &offsets("x", 3.0, 0.0)).unwrap(),
            r#"<svg><g data-id="x" id="x" transform="translate(3 0) scale(2)"></g></svg>"#
        );
    }

    #[test]
    fn test_single_quoted_id() {
        let svg = "<svg><g id='heat_pump' class='unit' title='say \"hi\"'><rect/></g></svg>";
        assert_eq!(
            export_svg(svg, &offsets("heat_pump", 5.0, 5.0)).unwrap(),
            r#"<svg><g id="heat_pump" class="unit" title="say &quot;hi&quot;" transform="translate(5 5)"><rect/></g></svg>"#
        );
    }

    #[test]
    fn test_angle_bracket_in_attribute_value() {
        let svg = r#"<svg><g data-note="T>50" id="heat_pump"/></svg>"#;
        assert_eq!(
            export_svg(svg, &offsets("heat_pump", 5.0, 5.0)).unwrap(),
            r#"<svg><g data-note="T>50" id="heat_pump" transform="translate(5 5)"/></svg>"#
        );
    }

    #[test]
    fn test_zero_offset_leaves_document_untouched() {
        let svg = r#"<svg><g id="x"><text>a &lt; b</text></g></svg>"#;
        assert_eq!(export_svg(svg, &offsets("x", 0.0, 0.0)).unwrap(), svg);
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(matches!(
            export_svg("<svg><g></svg>", &BTreeMap::new()),
            Err(AppError::Diagram(_))
        ));
    }

    #[test]
    fn test_catalogue_matches_asset() {
        for element in ELEMENTS {
            assert!(
                SCHEMATIC_SVG.contains(&format!("id=\"{}\"", element.id)),
                "{} missing from schematic",
                element.id
            );
        }
    }
}

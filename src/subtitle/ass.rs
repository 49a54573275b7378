//! ASS styling for the muxing boundary.
//!
//! Style selection is a muxer input, not a pipeline-core concern: a named
//! preset is rendered into an ASS header and the SRT cues become Dialogue
//! events for burn-in.

use std::time::Duration;

use super::SrtSegment;

/// Named font/size/colour template applied when burning subtitles in.
#[derive(Debug, Clone, PartialEq)]
pub struct StylePreset {
    pub name: &'static str,
    pub font: &'static str,
    pub font_size: u32,
    /// Primary colour in ASS `&HAABBGGRR` form.
    pub primary_colour: &'static str,
    pub outline: u32,
}

impl StylePreset {
    pub fn default_style() -> Self {
        Self {
            name: "default",
            font: "Arial",
            font_size: 24,
            primary_colour: "&H00FFFFFF",
            outline: 2,
        }
    }

    pub fn cinema() -> Self {
        Self {
            name: "cinema",
            font: "Georgia",
            font_size: 28,
            primary_colour: "&H00E0E0E0",
            outline: 3,
        }
    }

    pub fn compact() -> Self {
        Self {
            name: "compact",
            font: "Helvetica",
            font_size: 18,
            primary_colour: "&H00FFFFFF",
            outline: 1,
        }
    }

    /// Look up a preset by name.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" => Some(Self::default_style()),
            "cinema" => Some(Self::cinema()),
            "compact" => Some(Self::compact()),
            _ => None,
        }
    }
}

/// Render segments as a complete ASS document with the given style.
pub fn render_ass(segments: &[SrtSegment], style: &StylePreset) -> String {
    let mut out = String::new();

    out.push_str("[Script Info]\n");
    out.push_str("ScriptType: v4.00+\n");
    out.push_str("WrapStyle: 0\n");
    out.push_str("ScaledBorderAndShadow: yes\n\n");

    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, OutlineColour, BackColour, \
         Bold, Italic, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV\n",
    );
    out.push_str(&format!(
        "Style: {},{},{},{},&H00000000,&H80000000,0,0,1,{},0,2,20,20,20\n\n",
        style.name, style.font, style.font_size, style.primary_colour, style.outline
    ));

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for segment in segments {
        out.push_str(&format!(
            "Dialogue: 0,{},{},{},,0,0,0,,{}\n",
            format_ass_timestamp(segment.start),
            format_ass_timestamp(segment.end),
            style.name,
            segment.text.replace('\n', "\\N")
        ));
    }

    out
}

/// ASS timestamps are `H:MM:SS.cc` (centiseconds).
fn format_ass_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let centis = d.subsec_millis() / 10;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<SrtSegment> {
        vec![SrtSegment {
            index: 1,
            start: Duration::from_millis(1500),
            end: Duration::from_millis(4250),
            text: "Hello\nthere".to_string(),
        }]
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(StylePreset::by_name("cinema"), Some(StylePreset::cinema()));
        assert_eq!(StylePreset::by_name("CINEMA"), Some(StylePreset::cinema()));
        assert!(StylePreset::by_name("neon").is_none());
    }

    #[test]
    fn test_ass_timestamp_format() {
        assert_eq!(format_ass_timestamp(Duration::from_millis(1500)), "0:00:01.50");
        assert_eq!(
            format_ass_timestamp(Duration::from_secs(3661) + Duration::from_millis(120)),
            "1:01:01.12"
        );
    }

    #[test]
    fn test_render_contains_style_and_dialogue() {
        let doc = render_ass(&sample(), &StylePreset::cinema());
        assert!(doc.contains("[Script Info]"));
        assert!(doc.contains("Style: cinema,Georgia,28"));
        assert!(doc.contains("Dialogue: 0,0:00:01.50,0:00:04.25,cinema"));
        // Newlines inside a cue become ASS line breaks.
        assert!(doc.contains("Hello\\Nthere"));
    }
}
